//! Fuzz the sample ring buffer against a plain vector model.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use wirepool_stats::RingBuffer;

#[derive(Debug, Arbitrary)]
enum Op {
    Push(u32),
    Clear,
    Percentile(u8),
}

#[derive(Debug, Arbitrary)]
struct Input {
    capacity: u8,
    ops: Vec<Op>,
}

fuzz_target!(|input: Input| {
    let capacity = usize::from(input.capacity);
    let Ok(mut buffer) = RingBuffer::new(capacity) else {
        assert_eq!(capacity, 0);
        return;
    };
    let mut model: Vec<u32> = Vec::new();

    for op in input.ops {
        match op {
            Op::Push(value) => {
                buffer.push(value);
                model.push(value);
                if model.len() > capacity {
                    model.remove(0);
                }
            }
            Op::Clear => {
                buffer.clear();
                model.clear();
            }
            Op::Percentile(p) => {
                let p = f64::from(p) / 255.0;
                match buffer.percentile(p) {
                    Some(value) => assert!(model.contains(&value)),
                    None => assert!(model.is_empty()),
                }
            }
        }
        assert_eq!(buffer.len(), model.len());
        assert_eq!(buffer.to_vec(), model);
    }
});
