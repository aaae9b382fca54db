// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::Result;
use ::detcoro::{
    ensure_eq,
    Channel,
    Context,
    CoroutineStatus,
    Dispatcher,
    PanicError,
    TryRecvError,
    TrySendError,
};
use common::{
    execute,
    execute_expecting_panic,
    setup,
    strings,
    Trace,
};

//==============================================================================
// Tests
//==============================================================================

#[test]
fn unbuffered_send_meets_receiver() -> Result<()> {
    setup();
    let trace: Trace = Trace::default();
    let root_trace: Trace = trace.clone();
    let mut dispatcher: Dispatcher = Dispatcher::new(move |ctx: &Context| {
        let chan: Channel<u32> = ctx.new_named_channel("rendezvous");
        let (producer_chan, producer_trace): (Channel<u32>, Trace) = (chan.clone(), root_trace.clone());
        ctx.new_named_coroutine("producer", move |ctx: &Context| {
            for i in 1..=3 {
                producer_trace.push(format!("send {}", i));
                producer_chan.send(ctx, i);
                producer_trace.push(format!("sent {}", i));
            }
            producer_chan.close();
        });
        let consumer_trace: Trace = root_trace.clone();
        ctx.new_named_coroutine("consumer", move |ctx: &Context| {
            while let Some(i) = chan.recv(ctx) {
                consumer_trace.push(format!("recv {}", i));
            }
            consumer_trace.push("closed");
        });
    })?;
    execute(&mut dispatcher)?;
    ensure_eq!(dispatcher.is_done(), true);
    // The second value is handed straight to the waiting consumer, so its sender does not block.
    ensure_eq!(
        trace.events(),
        strings(&[
            "send 1", "recv 1", "sent 1", "send 2", "sent 2", "send 3", "recv 2", "recv 3", "sent 3", "closed",
        ])
    );
    Ok(())
}

#[test]
fn blocked_sender_resumes_when_a_slot_frees_up() -> Result<()> {
    setup();
    let trace: Trace = Trace::default();
    let root_trace: Trace = trace.clone();
    let mut dispatcher: Dispatcher = Dispatcher::new(move |ctx: &Context| {
        let chan: Channel<u32> = ctx.new_named_buffered_channel("slots", 1);
        let (producer_chan, producer_trace): (Channel<u32>, Trace) = (chan.clone(), root_trace.clone());
        ctx.new_named_coroutine("producer", move |ctx: &Context| {
            for i in 1..=2 {
                producer_chan.send(ctx, i);
                producer_trace.push(format!("sent {}", i));
            }
            producer_chan.close();
        });
        let consumer_trace: Trace = root_trace.clone();
        ctx.new_named_coroutine("consumer", move |ctx: &Context| {
            while let Some(i) = chan.recv(ctx) {
                consumer_trace.push(format!("recv {}", i));
            }
            consumer_trace.push("closed");
        });
    })?;
    execute(&mut dispatcher)?;
    ensure_eq!(
        trace.events(),
        strings(&["sent 1", "recv 1", "recv 2", "sent 2", "closed"])
    );
    Ok(())
}

#[test]
fn buffered_channel_refuses_one_past_capacity() -> Result<()> {
    setup();
    let trace: Trace = Trace::default();
    let root_trace: Trace = trace.clone();
    let mut dispatcher: Dispatcher = Dispatcher::new(move |ctx: &Context| {
        let chan: Channel<u32> = ctx.new_buffered_channel(4);
        for i in 0..5 {
            match chan.send_async(i) {
                Ok(()) => root_trace.push(format!("accepted {}", i)),
                Err(TrySendError::Full(v)) => root_trace.push(format!("full {}", v)),
                Err(TrySendError::Closed(v)) => root_trace.push(format!("closed {}", v)),
            }
        }
        root_trace.push(format!("len {}", chan.len()));
    })?;
    execute(&mut dispatcher)?;
    ensure_eq!(
        trace.events(),
        strings(&["accepted 0", "accepted 1", "accepted 2", "accepted 3", "full 4", "len 4"])
    );
    Ok(())
}

#[test]
fn closed_channel_drains_then_reports_closed_forever() -> Result<()> {
    setup();
    let trace: Trace = Trace::default();
    let root_trace: Trace = trace.clone();
    let mut dispatcher: Dispatcher = Dispatcher::new(move |ctx: &Context| {
        let chan: Channel<&'static str> = ctx.new_named_buffered_channel("mailbox", 3);
        chan.send(ctx, "a");
        chan.send(ctx, "b");
        chan.close();
        for _ in 0..4 {
            root_trace.push(format!("{:?}", chan.recv(ctx)));
        }
        root_trace.push(format!("{:?}", chan.recv_async()));
    })?;
    execute(&mut dispatcher)?;
    ensure_eq!(
        trace.events(),
        strings(&["Some(\"a\")", "Some(\"b\")", "None", "None", "Err(Closed)"])
    );
    Ok(())
}

#[test]
fn recv_async_distinguishes_empty_from_closed() -> Result<()> {
    setup();
    let trace: Trace = Trace::default();
    let root_trace: Trace = trace.clone();
    let mut dispatcher: Dispatcher = Dispatcher::new(move |ctx: &Context| {
        let chan: Channel<u32> = ctx.new_buffered_channel(1);
        root_trace.push(format!("{:?}", chan.recv_async()));
        chan.send(ctx, 9);
        root_trace.push(format!("{:?}", chan.recv_async()));
        chan.close();
        root_trace.push(format!("{:?}", chan.recv_async()));
    })?;
    execute(&mut dispatcher)?;
    ensure_eq!(trace.events(), strings(&["Err(Empty)", "Ok(9)", "Err(Closed)"]));
    ensure_eq!(TryRecvError::Empty == TryRecvError::Closed, false);
    Ok(())
}

#[test]
fn waiting_receivers_are_served_in_registration_order() -> Result<()> {
    setup();
    let trace: Trace = Trace::default();
    let root_trace: Trace = trace.clone();
    let mut dispatcher: Dispatcher = Dispatcher::new(move |ctx: &Context| {
        let chan: Channel<u32> = ctx.new_named_channel("fanout");
        for name in ["first", "second"] {
            let (chan, trace): (Channel<u32>, Trace) = (chan.clone(), root_trace.clone());
            ctx.new_named_coroutine(name, move |ctx: &Context| {
                if let Some(v) = chan.recv(ctx) {
                    trace.push(format!("{} got {}", ctx.coroutine_name(), v));
                }
            });
        }
        let producer_trace: Trace = root_trace.clone();
        ctx.new_named_coroutine("producer", move |_: &Context| {
            for v in [10, 20, 30] {
                if chan.send_async(v).is_err() {
                    producer_trace.push(format!("refused {}", v));
                }
            }
        });
    })?;
    execute(&mut dispatcher)?;
    ensure_eq!(
        trace.events(),
        strings(&["refused 30", "first got 10", "second got 20"])
    );
    ensure_eq!(dispatcher.is_done(), true);
    Ok(())
}

#[test]
fn send_on_closed_channel_panics() -> Result<()> {
    setup();
    let mut dispatcher: Dispatcher = Dispatcher::new(|ctx: &Context| {
        let chan: Channel<u32> = ctx.new_named_buffered_channel("numbers", 1);
        chan.close();
        if chan.send_async(1).is_ok() {
            return;
        }
        chan.send(ctx, 1);
    })?;
    let error: PanicError = execute_expecting_panic(&mut dispatcher)?;
    ensure_eq!(error.message(), "send on closed channel numbers");
    ensure_eq!(error.coroutine(), "root");
    Ok(())
}

#[test]
fn pending_sender_panics_when_channel_is_closed() -> Result<()> {
    setup();
    let mut dispatcher: Dispatcher = Dispatcher::new(|ctx: &Context| {
        let chan: Channel<u32> = ctx.new_named_channel("doomed");
        let sender_chan: Channel<u32> = chan.clone();
        ctx.new_named_coroutine("sender", move |ctx: &Context| sender_chan.send(ctx, 1));
        ctx.new_named_coroutine("closer", move |_: &Context| chan.close());
    })?;
    let error: PanicError = execute_expecting_panic(&mut dispatcher)?;
    ensure_eq!(error.coroutine(), "sender");
    ensure_eq!(error.message(), "send on closed channel doomed");
    ensure_eq!(dispatcher.coroutines()[1].status, CoroutineStatus::Panicked);
    ensure_eq!(dispatcher.coroutines()[2].status, CoroutineStatus::Done);
    Ok(())
}

#[test]
fn double_close_panics() -> Result<()> {
    setup();
    let mut dispatcher: Dispatcher = Dispatcher::new(|ctx: &Context| {
        let chan: Channel<u32> = ctx.new_named_channel("twice");
        chan.close();
        chan.close();
    })?;
    let error: PanicError = execute_expecting_panic(&mut dispatcher)?;
    ensure_eq!(error.message(), "close of closed channel twice");
    Ok(())
}

#[test]
fn blocked_sender_shows_up_in_stack_trace() -> Result<()> {
    setup();
    let mut dispatcher: Dispatcher = Dispatcher::new(|ctx: &Context| {
        ctx.new_named_channel::<u32>("nobody").send(ctx, 1);
    })?;
    execute(&mut dispatcher)?;
    ensure_eq!(dispatcher.is_done(), false);
    ensure_eq!(
        dispatcher.stack_trace().contains("coroutine root [blocked on nobody.Send]"),
        true
    );
    Ok(())
}
