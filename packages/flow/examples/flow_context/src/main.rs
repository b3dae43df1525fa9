#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Execution context example for `switchy_flow`.
//!
//! The upstream of the flow (the simulated reads and the `map` after them)
//! runs on a dedicated `io` dispatcher through `flow_on`. Everything after
//! `flow_on` runs where the flow is collected. Every line printed names the
//! thread it came from.

use std::time::Duration;

use switchy_channel::Capacity;
use switchy_flow::{FlowError, flow};
use switchy_task::{Dispatcher, delay};
use thiserror::Error;

#[derive(Debug, Error)]
enum Error {
    #[error(transparent)]
    Task(#[from] switchy_task::Error),
    #[error(transparent)]
    Flow(#[from] FlowError),
}

fn thread_name() -> String {
    std::thread::current()
        .name()
        .unwrap_or("unnamed")
        .to_owned()
}

/// Entry point for the flow context example.
///
/// # Errors
///
/// * If the `io` dispatcher fails to start
/// * If the flow fails in a way the `catch` does not recover from
#[tokio::main]
async fn main() -> Result<(), Error> {
    pretty_env_logger::init();

    let io = Dispatcher::multi_thread("io", 2)?;

    let sectors = flow(|emitter| async move {
        for sector in 1..=6_u32 {
            delay(Duration::from_millis(50)).await;
            println!("[{}] read sector {sector}", thread_name());
            if sector == 6 {
                return Err(FlowError::msg("sector 6 is unreadable"));
            }
            emitter.emit(sector).await?;
        }
        Ok(())
    })
    .map(|sector| u64::from(sector) * 512)
    .flow_on(&io)
    .buffer(Capacity::Bounded(2))
    .catch(|error, emitter| async move {
        println!("[{}] recovering from: {error}", thread_name());
        emitter.emit(0).await
    });

    let total = sectors
        .fold(0, |total, bytes| {
            println!("[{}] collected {bytes} bytes", thread_name());
            total + bytes
        })
        .await?;

    log::debug!("collection finished on {}", thread_name());
    println!("[{}] {total} bytes in total", thread_name());

    Ok(())
}
