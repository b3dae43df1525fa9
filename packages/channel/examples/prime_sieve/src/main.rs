#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Prime sieve example for `switchy_channel`.
//!
//! An endless counter is the first stage of a pipeline. Every prime that
//! comes out of the pipeline adds a new `produce` stage that drops the
//! multiples of that prime. All stages are jobs of one [`Scope`], so
//! cancelling the scope tears the whole pipeline down.

use switchy_channel::{Capacity, ClosedChannel, Producer, produce};
use switchy_task::{Error, Scope};

fn numbers_from(scope: &Scope, start: u64) -> Producer<u64> {
    produce(scope, Capacity::Rendezvous, move |sender| async move {
        for x in start.. {
            sender.send(x).await?;
        }
        Ok::<_, ClosedChannel>(())
    })
}

fn without_multiples(scope: &Scope, source: Producer<u64>, prime: u64) -> Producer<u64> {
    produce(scope, Capacity::Rendezvous, move |sender| async move {
        while let Ok(x) = source.receive().await {
            if x % prime != 0 {
                sender.send(x).await?;
            }
        }
        Ok::<_, ClosedChannel>(())
    })
}

/// Entry point for the prime sieve example.
///
/// Prints as many primes as the first argument asks for, 10 by default.
///
/// # Errors
///
/// * If no tokio runtime is available to build the scope on
#[tokio::main]
async fn main() -> Result<(), Error> {
    pretty_env_logger::init();

    let count = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse::<usize>().ok())
        .unwrap_or(10);

    let scope = Scope::new("sieve")?;
    let mut primes = numbers_from(&scope, 2);

    for n in 1..=count {
        let Ok(prime) = primes.receive().await else {
            break;
        };
        println!("{n:>4}: {prime}");
        log::debug!("adding a stage for {prime}");
        primes = without_multiples(&scope, primes, prime);
    }

    scope.cancel_and_join().await;

    Ok(())
}
