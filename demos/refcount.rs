//! Duplicate a channel handle across two coroutines and watch it survive
//! until the last holder closes it.

use corochan::{channel, chsend, go, hclose, hdup, run};

fn main() {
    env_logger::init();

    let ch = channel(std::mem::size_of::<i32>(), 1).expect("create channel");
    let ch2 = hdup(ch).expect("dup handle");

    go(move || {
        chsend(ch, &1i32.to_ne_bytes(), None).expect("send");
        println!("first holder sent, closing its handle");
        hclose(ch).expect("close");
    })
    .expect("spawn first holder");

    go(move || {
        println!("second holder still has a live handle: {}", ch2);
        hclose(ch2).expect("close");
        println!("last holder closed the channel");
    })
    .expect("spawn second holder");

    run();
}
