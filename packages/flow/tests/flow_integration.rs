use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use pretty_assertions::assert_eq;
use switchy_channel::Capacity;
use switchy_flow::{AsFlow as _, Flow, FlowError, FlowState, flow};
use switchy_task::{Dispatcher, JobState, Scope, delay};

fn logged_numbers(events: &Arc<Mutex<Vec<String>>>, count: u32) -> Flow<u32> {
    let events = events.clone();
    flow(move |emitter| {
        let events = events.clone();
        async move {
            events.lock().unwrap().push("started".to_owned());
            for x in 1..=count {
                events.lock().unwrap().push(format!("emit {x}"));
                emitter.emit(x).await?;
            }
            Ok(())
        }
    })
}

#[test_log::test(tokio::test)]
async fn test_nothing_runs_until_collected_and_every_collection_restarts() {
    let events = Arc::new(Mutex::new(vec![]));
    let numbers = logged_numbers(&events, 2).map(|x| x * 10);

    assert!(events.lock().unwrap().is_empty());

    assert_eq!(numbers.to_vec().await.unwrap(), vec![10, 20]);
    assert_eq!(numbers.to_vec().await.unwrap(), vec![10, 20]);
    let started = events
        .lock()
        .unwrap()
        .iter()
        .filter(|event| *event == "started")
        .count();
    assert_eq!(started, 2);
}

#[test_log::test(tokio::test)]
async fn test_unbuffered_emitter_and_collector_alternate() {
    let events = Arc::new(Mutex::new(vec![]));
    let numbers = logged_numbers(&events, 3).filter(|x| x % 2 == 1);

    numbers
        .collect(|x| {
            events.lock().unwrap().push(format!("collect {x}"));
            async { Ok(()) }
        })
        .await
        .unwrap();

    assert_eq!(
        *events.lock().unwrap(),
        vec![
            "started",
            "emit 1",
            "collect 1",
            "emit 2",
            "emit 3",
            "collect 3"
        ]
    );
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_launched_flows_run_concurrently_and_stop_with_their_scope() {
    let scope = Scope::new("events").unwrap();
    let seen = Arc::new(Mutex::new(vec![]));

    for (name, interval) in [("fast", 100), ("slow", 270)] {
        let seen = seen.clone();
        let ticks = flow(move |emitter| async move {
            let mut tick = 0;
            loop {
                delay(Duration::from_millis(interval)).await;
                tick += 1;
                emitter.emit(tick).await?;
            }
        })
        .on_each(move |tick| {
            seen.lock().unwrap().push(format!("{name} {tick}"));
            async { Ok(()) }
        });
        let _job = ticks.launch_in(&scope);
    }

    delay(Duration::from_millis(520)).await;
    scope.cancel_and_join().await;
    let at_cancel = seen.lock().unwrap().len();
    delay(Duration::from_secs(1)).await;

    let seen = seen.lock().unwrap();
    assert_eq!(
        *seen,
        vec!["fast 1", "fast 2", "slow 1", "fast 3", "fast 4", "fast 5"]
    );
    assert_eq!(seen.len(), at_cancel);
}

#[test_log::test(tokio::test)]
async fn test_failure_in_a_launched_flow_is_reported_by_its_job() {
    let scope = Scope::new("failing").unwrap();
    let failures = Arc::new(Mutex::new(vec![]));

    let job = {
        let failures = failures.clone();
        (1..=3)
            .as_flow()
            .try_map(|x| match x {
                2 => Err(FlowError::msg("two is not allowed")),
                x => Ok(x),
            })
            .on_completion(move |cause| {
                failures.lock().unwrap().extend(cause.map(|e| e.to_string()));
                async {}
            })
            .launch_in(&scope)
    };

    assert_eq!(FlowState::from(job.join().await), FlowState::Failed);
    assert_eq!(*failures.lock().unwrap(), vec!["two is not allowed"]);
    assert_eq!(job.state(), JobState::Failed);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_pipeline_across_dispatchers() {
    let dispatcher = Dispatcher::multi_thread("flow-io", 2).unwrap();

    let squares = (1..=100)
        .as_flow()
        .map(|x: u64| x * x)
        .flow_on(&dispatcher)
        .buffer(Capacity::Bounded(8))
        .filter(|x| x % 2 == 0);

    assert_eq!(squares.count().await.unwrap(), 50);
    assert_eq!(
        squares.fold(0, |acc, x| acc + x).await.unwrap(),
        (1..=50).map(|x: u64| (2 * x) * (2 * x)).sum::<u64>()
    );
}

#[test_log::test(tokio::test)]
async fn test_produce_in_feeds_a_channel_consumer() {
    let scope = Scope::new("bridge").unwrap();
    let producer = (1..=5)
        .as_flow()
        .map(|x| x * 2)
        .produce_in(&scope, Capacity::Bounded(2));

    let mut received = vec![];
    while let Ok(x) = producer.receive().await {
        received.push(x);
    }

    assert_eq!(received, vec![2, 4, 6, 8, 10]);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_cancelling_a_producer_stops_the_flow() {
    let scope = Scope::new("bridge").unwrap();
    let emitted = Arc::new(Mutex::new(0));

    let endless = {
        let emitted = emitted.clone();
        flow(move |emitter| {
            let emitted = emitted.clone();
            async move {
                loop {
                    delay(Duration::from_millis(10)).await;
                    *emitted.lock().unwrap() += 1;
                    emitter.emit(()).await?;
                }
            }
        })
    };
    let producer = endless.produce_in(&scope, Capacity::Rendezvous);

    producer.receive().await.unwrap();
    producer.receive().await.unwrap();
    producer.cancel();
    assert_eq!(producer.job().join().await, JobState::Cancelled);

    let at_cancel = *emitted.lock().unwrap();
    delay(Duration::from_secs(1)).await;
    assert_eq!(*emitted.lock().unwrap(), at_cancel);
}
