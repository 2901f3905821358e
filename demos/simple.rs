//! Spawn a couple of coroutines and let them hand a value back and forth
//! over an unbuffered channel.

use corochan::{chrecv, chsend, channel, go, run};

fn main() {
    env_logger::init();

    let ch = channel(std::mem::size_of::<i32>(), 0).expect("create channel");

    go(move || {
        println!("1. hello from the sending coroutine");
        chsend(ch, &1i32.to_ne_bytes(), None).expect("send");
        println!("3. sender done");
    })
    .expect("spawn sender");

    go(move || {
        let mut buf = [0u8; 4];
        chrecv(ch, &mut buf, None).expect("recv");
        println!("2. received {}", i32::from_ne_bytes(buf));
    })
    .expect("spawn receiver");

    // Nothing runs until the scheduler is driven explicitly.
    run();
    println!("4. back in main");
}
