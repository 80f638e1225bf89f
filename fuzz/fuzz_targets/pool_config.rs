//! Fuzz pool configuration parsing and validation.

#![no_main]

use libfuzzer_sys::fuzz_target;
use wirepool::PoolConfig;

fuzz_target!(|data: &[u8]| {
    let Ok(config) = serde_json::from_slice::<PoolConfig>(data) else {
        return;
    };
    if config.validate().is_ok() {
        assert!(config.max_connections > 0);
        let reparsed: PoolConfig = match serde_json::from_str(&config.cache_key()) {
            Ok(reparsed) => reparsed,
            Err(e) => panic!("cache key is not valid config JSON: {e}"),
        };
        assert_eq!(reparsed.cache_key(), config.cache_key());
    }
});
