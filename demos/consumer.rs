//! CLI demo consumer: attaches a named shared-memory segment and prints
//! every entry it reads until interrupted.
//!
//! Illustrative glue, not part of the core's correctness surface — see
//! spec.md §1. Grounded on `examples/original_source/src/consumer.c`'s
//! shape (loop `ipc_read` until the entry is empty, print the payload);
//! here the loop instead blocks via `Channel::read` and never terminates
//! on an empty queue, since this crate has no end-of-stream marker.
//!
//! Run with: `cargo run --example consumer -- /my-queue`

use ringmpmc_rs::channel::{Channel, ChannelConfig};
use ringmpmc_rs::error::{ChannelError, RingError};
use ringmpmc_rs::ring::RingBuffer;
use ringmpmc_rs::shm::SharedSegment;
use std::env;

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

    eprintln!("consumer: attached to {name} ({} bytes)", segment.size());

    loop {
        match channel.read() {
            Ok(payload) => match std::str::from_utf8(&payload) {
                Ok(text) => println!("{text}"),
                Err(_) => println!("{payload:?}"),
            },
            Err(ChannelError::Ring(RingError::RetryLimit { offset })) => {
                eprintln!("consumer: giving up on stuck entry at offset {offset}, forcing past it");
                channel.force_skip().ok();
            }
            Err(e) => {
                eprintln!("consumer: fatal error: {e}");
                break;
            }
        }
    }
}
