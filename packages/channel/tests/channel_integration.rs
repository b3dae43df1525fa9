use std::{
    collections::HashSet,
    convert::Infallible,
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::StreamExt as _;
use pretty_assertions::assert_eq;
use switchy_channel::{BufferOverflow, Capacity, Channel, Producer, Receiver, channel, produce};
use switchy_task::{Scope, delay};

async fn send_then_close(channel: &Channel<u32>, count: u32) {
    for x in 0..count {
        channel.send(x).await.unwrap();
    }
    channel.close();
}

async fn drain(channel: &Channel<u32>) -> Vec<u32> {
    let mut received = vec![];
    while let Ok(x) = channel.receive().await {
        received.push(x);
    }
    received
}

#[test_log::test(tokio::test)]
async fn test_drop_latest_keeps_the_first_values() {
    let channel = Channel::with_overflow(Capacity::Bounded(2), BufferOverflow::DropLatest).unwrap();

    send_then_close(&channel, 50).await;

    assert_eq!(drain(&channel).await, vec![0, 1]);
}

#[test_log::test(tokio::test)]
async fn test_drop_oldest_keeps_the_last_values() {
    let channel = Channel::with_overflow(Capacity::Bounded(2), BufferOverflow::DropOldest).unwrap();

    send_then_close(&channel, 50).await;

    assert_eq!(drain(&channel).await, vec![48, 49]);
}

#[test_log::test(tokio::test)]
async fn test_conflated_keeps_only_the_latest() {
    let channel = channel(Capacity::Conflated);

    send_then_close(&channel, 10).await;

    assert_eq!(drain(&channel).await, vec![9]);
}

#[test_log::test(tokio::test)]
async fn test_unlimited_never_suspends_and_loses_nothing() {
    let channel = channel(Capacity::Unlimited);

    send_then_close(&channel, 1000).await;

    assert_eq!(drain(&channel).await, (0..1000).collect::<Vec<_>>());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_suspending_channels_deliver_everything_to_a_slow_receiver() {
    for capacity in [
        Capacity::Rendezvous,
        Capacity::Bounded(1),
        Capacity::Bounded(10),
        Capacity::Buffered,
    ] {
        let channel = channel(capacity);
        let sender = channel.sender().clone();
        let producer = tokio::spawn(async move {
            for x in 0..20 {
                sender.send(x).await.unwrap();
            }
        });

        let mut received = vec![];
        for _ in 0..20 {
            received.push(channel.receive().await.unwrap());
            delay(Duration::from_millis(100)).await;
        }
        producer.await.unwrap();

        assert_eq!(received, (0..20).collect::<Vec<_>>(), "{capacity:?}");
    }
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_bounded_sender_suspends_while_full() {
    let channel = channel(Capacity::Bounded(10));
    let sent = Arc::new(Mutex::new(0));

    let sender = channel.sender().clone();
    let counter = sent.clone();
    tokio::spawn(async move {
        for x in 0..20 {
            sender.send(x).await.unwrap();
            *counter.lock().unwrap() += 1;
        }
    });

    delay(Duration::from_millis(50)).await;
    assert_eq!(*sent.lock().unwrap(), 10);

    channel.receive().await.unwrap();
    delay(Duration::from_millis(50)).await;
    assert_eq!(*sent.lock().unwrap(), 11);
}

/// Sending and then receiving on a rendezvous channel from one task never
/// completes: the send waits for a receiver the same task would only become
/// after the send returned.
#[test_log::test(tokio::test(start_paused = true))]
async fn test_same_task_rendezvous_send_then_receive_suspends_forever() {
    let channel = channel::<u32>(Capacity::Rendezvous);

    let outcome = tokio::time::timeout(Duration::from_secs(60), async {
        channel.send(1).await.unwrap();
        channel.receive().await.unwrap()
    })
    .await;

    assert!(outcome.is_err());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_fan_out_delivers_each_value_to_exactly_one_consumer() {
    let scope = Scope::new("fan-out").unwrap();
    let numbers: Producer<u32> = produce(&scope, Capacity::Rendezvous, |sender| async move {
        let mut x = 1;
        while sender.send(x).await.is_ok() {
            x += 1;
            delay(Duration::from_millis(100)).await;
        }
        Ok::<_, Infallible>(())
    });

    let seen = Arc::new(Mutex::new(vec![]));
    let consumers = (0..5)
        .map(|id| {
            let receiver = numbers.receiver().clone();
            let seen = seen.clone();
            scope.launch("consumer", async move {
                receiver
                    .consume_each(|x| {
                        seen.lock().unwrap().push((id, x));
                        async {}
                    })
                    .await;
            })
        })
        .collect::<Vec<_>>();

    delay(Duration::from_millis(950)).await;
    numbers.cancel();
    for consumer in &consumers {
        consumer.join().await;
    }

    let seen = seen.lock().unwrap();
    let values = seen.iter().map(|(_, x)| *x).collect::<Vec<_>>();
    assert_eq!(values, (1..=10).collect::<Vec<_>>());
    let consumers_used = seen.iter().map(|(id, _)| *id).collect::<HashSet<_>>();
    assert_eq!(consumers_used.len(), 5);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_fan_in_merges_producers_into_one_channel() {
    let scope = Scope::new("fan-in").unwrap();
    let channel = channel::<u32>(Capacity::Rendezvous);

    for (from, interval) in [(1, 100), (2, 150)] {
        let sender = channel.sender().clone();
        scope.launch("producer", async move {
            let mut x = from;
            while sender.send(x).await.is_ok() {
                x += 2;
                delay(Duration::from_millis(interval)).await;
            }
        });
    }

    let mut received = vec![];
    for _ in 0..8 {
        received.push(channel.receive().await.unwrap());
    }
    scope.cancel_and_join().await;

    let odds = received.iter().filter(|x| *x % 2 == 1).count();
    let evens = received.len() - odds;
    assert!(odds > evens, "{received:?}");
    assert!(evens >= 2, "{received:?}");
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_parked_receivers_take_turns() {
    let scope = Scope::new("ping-pong").unwrap();
    let table = channel::<String>(Capacity::Rendezvous);
    let turns = Arc::new(Mutex::new(vec![]));

    for name in ["left", "right"] {
        let table = table.clone();
        let turns = turns.clone();
        scope.launch(name, async move {
            while let Ok(ball) = table.receive().await {
                turns.lock().unwrap().push((name, ball.clone()));
                let rotated = format!("{}{}", &ball[1..], &ball[..1]);
                if table.send(rotated).await.is_err() {
                    break;
                }
                delay(Duration::from_millis(100)).await;
            }
        });
    }
    delay(Duration::from_millis(1)).await;

    table.send("abc".to_owned()).await.unwrap();
    delay(Duration::from_millis(550)).await;
    scope.cancel_and_join().await;

    let turns = turns.lock().unwrap();
    let names = turns.iter().map(|(name, _)| *name).collect::<Vec<_>>();
    assert_eq!(names[..4], ["left", "right", "left", "right"]);
    assert_eq!(turns[0].1, "abc");
    assert_eq!(turns[1].1, "bca");
    assert_eq!(turns[2].1, "cab");
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_parked_senders_are_served_in_arrival_order() {
    for capacity in [Capacity::Rendezvous, Capacity::Bounded(1)] {
        let channel = channel::<u32>(capacity);
        let mut senders = vec![];

        for x in 1..=4 {
            let sender = channel.sender().clone();
            senders.push(tokio::spawn(async move { sender.send(x).await }));
            delay(Duration::from_millis(10)).await;
        }

        let mut received = vec![];
        for _ in 1..=4 {
            received.push(channel.receive().await.unwrap());
        }

        assert_eq!(received, vec![1, 2, 3, 4], "{capacity:?}");
        for sender in senders {
            sender.await.unwrap().unwrap();
        }
    }
}

#[test_log::test(tokio::test)]
async fn test_prime_sieve_pipeline() {
    fn numbers_from(scope: &Scope, start: u32) -> Receiver<u32> {
        produce(scope, Capacity::Rendezvous, move |sender| async move {
            let mut x = start;
            while sender.send(x).await.is_ok() {
                x += 1;
            }
            Ok::<_, Infallible>(())
        })
        .into_receiver()
    }

    fn filter(scope: &Scope, numbers: Receiver<u32>, prime: u32) -> Receiver<u32> {
        produce(scope, Capacity::Rendezvous, move |sender| async move {
            while let Ok(x) = numbers.receive().await {
                if x % prime != 0 && sender.send(x).await.is_err() {
                    break;
                }
            }
            Ok::<_, Infallible>(())
        })
        .into_receiver()
    }

    let scope = Scope::new("sieve").unwrap();
    let mut numbers = numbers_from(&scope, 2);
    let mut primes = vec![];
    for _ in 0..10 {
        let prime = numbers.receive().await.unwrap();
        primes.push(prime);
        numbers = filter(&scope, numbers, prime);
    }
    scope.cancel_and_join().await;

    assert_eq!(primes, vec![2, 3, 5, 7, 11, 13, 17, 19, 23, 29]);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_exactly_once_delivery_across_threads() {
    let channel = channel::<u32>(Capacity::Bounded(8));
    let mut producers = vec![];
    for p in 0..4 {
        let sender = channel.sender().clone();
        producers.push(tokio::spawn(async move {
            for x in 0..250 {
                sender.send(p * 1000 + x).await.unwrap();
            }
        }));
    }

    let mut consumers = vec![];
    for _ in 0..4 {
        let receiver = channel.receiver().clone();
        consumers.push(tokio::spawn(receiver.collect::<Vec<_>>()));
    }

    for producer in producers {
        producer.await.unwrap();
    }
    let (sender, receiver) = channel.split();
    drop(sender);
    drop(receiver);

    let mut all = vec![];
    for consumer in consumers {
        all.extend(consumer.await.unwrap());
    }
    all.sort_unstable();

    let mut expected = (0..4)
        .flat_map(|p| (0..250).map(move |x| p * 1000 + x))
        .collect::<Vec<_>>();
    expected.sort_unstable();
    assert_eq!(all, expected);
}
