use core::hash::Hash;
use std::collections::hash_map::{Entry, HashMap};

/// Returned by [`Exchange::receive`] and [`Exchange::ready`] to indicate
/// whether a task has everything it needs to be evaluated.
pub enum Status {
    Eligible,
    Ineligible,
}

impl Status {
    pub fn eligible_if(condition: bool) -> Self {
        if condition {
            Self::Eligible
        } else {
            Self::Ineligible
        }
    }
}

/// A member of a group of compute tasks that trade data products before
/// running. The model is message passing rather than memory sharing: tasks
/// own their field buffers, and ownership of each message (and its backing
/// memory) moves to the recipient. Nothing needs to go under `Arc`, and the
/// executor never blocks a task that has its messages.
///
/// In this crate the tasks are per-patch guard-zone fills: each task's
/// messages are the slabs of its own valid data that neighboring patches
/// need, and a task becomes eligible once every slab addressed to it has
/// arrived. The synchronization point the transport integrator relies on
/// (no stencil touches guard data before the exchange completes) falls out
/// of the model: `value` cannot run before `receive` has delivered
/// everything.
pub trait Exchange {
    /// Uniquely identifies this task within its group. Executors require
    /// `Hash + Eq + Clone`, and `Send` when multi-threaded.
    type Key;

    /// The payload passed between tasks.
    type Message;

    /// The data product. Generation is the CPU-intensive part and may run
    /// on a worker thread.
    type Value;

    /// The key identifying this task.
    fn key(&self) -> Self::Key;

    /// Whether the task is eligible before receiving anything. Tasks that
    /// expect no messages (an isolated patch) must report `Eligible` here,
    /// since `receive` will never be called on them.
    fn ready(&self) -> Status;

    /// The messages this task sends to its peers, keyed by recipient.
    fn messages(&self) -> Vec<(Self::Key, Self::Message)>;

    /// Accept one incoming message. Returns `Eligible` when this was the
    /// last message the task was waiting on.
    fn receive(&mut self, message: Self::Message) -> Status;

    /// Run the task. Called exactly once, after eligibility.
    fn value(self) -> Self::Value;
}

/// Evaluate a group of exchange tasks on the calling thread.
///
pub fn execute<I, E, K, V>(group: I) -> Vec<V>
where
    I: IntoIterator<Item = E>,
    E: Exchange<Key = K, Value = V>,
    K: Hash + Eq + Clone,
{
    let (eligible_sink, eligible_source) = crossbeam_channel::unbounded();

    coordinate(group, eligible_sink);

    eligible_source.into_iter().map(|task: E| task.value()).collect()
}

/// Evaluate a group of exchange tasks with the CPU-intensive part spread
/// over the Rayon thread pool. The coordinator routes messages on the
/// calling thread and forwards eligible tasks through a channel to a
/// dispatcher, which fans them out with a parallel bridge. Results come
/// back unordered; callers reassemble by key.
///
pub fn execute_par<I, E, K, V>(group: I) -> Vec<V>
where
    I: IntoIterator<Item = E> + Send,
    E: Send + Exchange<Key = K, Value = V>,
    K: Hash + Eq + Clone,
    V: Send,
{
    use rayon::prelude::*;

    let (eligible_sink, eligible_source) = crossbeam_channel::unbounded();
    let (computed_sink, computed_source) = crossbeam_channel::unbounded();

    rayon::scope(|scope| {
        scope.spawn(move |_| {
            eligible_source
                .into_iter()
                .par_bridge()
                .for_each(|task: E| {
                    computed_sink.send(task.value()).unwrap()
                })
        });

        coordinate(group, eligible_sink);
    });

    computed_source.into_iter().collect()
}

fn coordinate<I, E, K, V>(group: I, eligible: crossbeam_channel::Sender<E>)
where
    I: IntoIterator<Item = E>,
    E: Exchange<Key = K, Value = V>,
    K: Hash + Eq + Clone,
{
    let tasks: Vec<E> = group.into_iter().collect();

    // Every task exists up front, so all outgoing messages can be gathered
    // before any routing happens.
    //
    let deliveries: Vec<(K, E::Message)> = tasks.iter().flat_map(|t| t.messages()).collect();

    let mut seen: HashMap<K, E> = tasks.into_iter().map(|t| (t.key(), t)).collect();

    // Tasks expecting no messages go straight to the executor.
    //
    let ready: Vec<K> = seen
        .iter()
        .filter(|(_, t)| matches!(t.ready(), Status::Eligible))
        .map(|(k, _)| k.clone())
        .collect();

    for key in ready {
        eligible.send(seen.remove(&key).unwrap()).unwrap()
    }

    for (dest, message) in deliveries {
        match seen.entry(dest) {
            Entry::Occupied(mut entry) => {
                if let Status::Eligible = entry.get_mut().receive(message) {
                    eligible.send(entry.remove()).unwrap()
                }
            }
            Entry::Vacant(_) => panic!("message addressed to an unknown or already-dispatched task"),
        }
    }

    assert!(
        seen.is_empty(),
        "{} exchange tasks never became eligible",
        seen.len());
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::{execute, execute_par, Exchange, Status};

    /// Each task holds one number and sends it to the task on its right
    /// (cyclically); the value is the sum of its own number and the one it
    /// received.
    struct RingSum {
        rank: usize,
        size: usize,
        own: f64,
        recv: Option<f64>,
    }

    impl Exchange for RingSum {
        type Key = usize;
        type Message = f64;
        type Value = (usize, f64);

        fn key(&self) -> usize {
            self.rank
        }

        fn ready(&self) -> Status {
            Status::eligible_if(self.size == 1)
        }

        fn messages(&self) -> Vec<(usize, f64)> {
            if self.size == 1 {
                vec![]
            } else {
                vec![((self.rank + 1) % self.size, self.own)]
            }
        }

        fn receive(&mut self, message: f64) -> Status {
            self.recv = Some(message);
            Status::Eligible
        }

        fn value(self) -> (usize, f64) {
            (self.rank, self.own + self.recv.unwrap_or(0.0))
        }
    }

    fn ring(size: usize) -> Vec<RingSum> {
        (0..size)
            .map(|rank| RingSum { rank, size, own: rank as f64, recv: None })
            .collect()
    }

    #[test]
    fn serial_execution_routes_all_messages() {
        let mut results = execute(ring(5));
        results.sort_by_key(|r| r.0);
        let expected = [4.0, 1.0, 3.0, 5.0, 7.0];
        for (n, (rank, value)) in results.into_iter().enumerate() {
            assert_eq!(rank, n);
            assert_eq!(value, expected[n]);
        }
    }

    #[test]
    fn parallel_execution_matches_serial() {
        let mut serial = execute(ring(20));
        let mut parallel = execute_par(ring(20));
        serial.sort_by_key(|r| r.0);
        parallel.sort_by_key(|r| r.0);
        assert_eq!(serial, parallel);
    }

    #[test]
    fn tasks_expecting_nothing_run_immediately() {
        let results = execute(ring(1));
        assert_eq!(results, vec![(0, 0.0)]);
    }
}
