#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Fan-out example for `switchy_channel`.
//!
//! A single producer queues jobs into a bounded channel that several workers
//! receive from. Each job is delivered to exactly one worker. Results flow
//! back over an unlimited channel and are gathered with a [`Select`] that
//! also wakes up when the workers have been quiet for too long.

use std::time::Duration;

use switchy_channel::{Capacity, Channel, ClosedChannel, Select, produce};
use switchy_task::{Error, Scope, delay};

const JOBS: u64 = 12;
const WORKERS: u64 = 3;

struct Report {
    worker: u64,
    job: u64,
    square: u64,
}

/// Entry point for the fan-out example.
///
/// # Errors
///
/// * If no tokio runtime is available to build the scope on
#[tokio::main]
async fn main() -> Result<(), Error> {
    pretty_env_logger::init();

    let scope = Scope::new("fan-out")?;

    let jobs = produce(&scope, Capacity::Bounded(4), |sender| async move {
        for job in 1..=JOBS {
            sender.send(job).await?;
            log::debug!("queued job {job}");
        }
        Ok::<_, ClosedChannel>(())
    });

    let reports = Channel::new(Capacity::Unlimited);
    for worker in 1..=WORKERS {
        let jobs = jobs.receiver().clone();
        let reports = reports.sender().clone();
        scope.launch(&format!("worker-{worker}"), async move {
            while let Ok(job) = jobs.receive().await {
                delay(Duration::from_millis(20 * (job % 4 + 1))).await;
                let report = Report {
                    worker,
                    job,
                    square: job * job,
                };
                if reports.send(report).await.is_err() {
                    break;
                }
            }
            log::debug!("worker {worker} is done");
        });
    }

    let mut received = 0;
    while received < JOBS {
        let next = Select::new()
            .on_receive(reports.receiver(), Some)
            .on_timeout(Duration::from_millis(500), || None)
            .await;

        match next {
            Ok(Some(report)) => {
                received += 1;
                println!(
                    "worker {} finished job {:>2}: {}",
                    report.worker, report.job, report.square
                );
            }
            Ok(None) => println!("no report for 500ms, still waiting"),
            Err(closed) => {
                println!("reports closed early: {closed}");
                break;
            }
        }
    }

    reports.close();
    scope.cancel_and_join().await;
    println!("received {received} of {JOBS} reports");

    Ok(())
}
