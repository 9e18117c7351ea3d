//! CLI demo producer: attaches (or creates) a named shared-memory segment
//! and writes each line of stdin as one entry.
//!
//! This is illustrative glue, not part of the core's correctness surface —
//! see spec.md §1's framing of CLI producers/consumers as external
//! collaborators. Grounded on `examples/original_source/src/producer.c`'s
//! shape (read stdin, write each unit as an entry) generalised from bytes
//! to lines.
//!
//! Run with: `cargo run --example producer -- /my-queue "hello world"`

use ringmpmc_rs::channel::{Channel, ChannelConfig};
use ringmpmc_rs::ring::RingBuffer;
use ringmpmc_rs::shm::SharedSegment;
use std::env;
use std::io::{self, BufRead};

fn main() {
    env_logger::init();
    let mut args = env::args().skip(1);
    let name = args.next().unwrap_or_else(|| "/ringmpmc-demo".to_string());

    let size = RingBuffer::suggest_size(1 << 20);
    let segment = SharedSegment::open_or_create(&name, size).expect("open or create shared segment");
    let buffer = unsafe { RingBuffer::attach_in(segment.as_ptr(), segment.size()) }
        .or_else(|_| unsafe { RingBuffer::create_in(segment.as_ptr(), segment.size()) })
        .expect("attach or initialise ring buffer");
    let channel = Channel::new(buffer, ChannelConfig::default_config());

    eprintln!("producer: attached to {name} ({} bytes)", segment.size());

    let rest: Vec<String> = args.collect();
    if rest.is_empty() {
        for line in io::stdin().lock().lines() {
            let line = line.expect("read stdin");
            loop {
                match channel.write(line.as_bytes()) {
                    Ok(()) => break,
                    Err(e) => {
                        log::debug!("write contended, retrying: {e}");
                        std::thread::yield_now();
                    }
                }
            }
        }
    } else {
        for line in rest {
            channel.write(line.as_bytes()).expect("write");
            eprintln!("producer: wrote {:?}", line);
        }
    }
}
