//! Outstanding request/response transactions on the signal channel
//!
//! Every higher level operation registers a [`LineMatcher`] before it
//! writes its command. The reader task offers each received line to the
//! registered matchers in registration order; the first one that reports
//! completion consumes the line and is removed. A transaction that sees no
//! completing line before its deadline is expired instead. Exactly one of
//! the two happens, because both paths remove the entry under the same
//! lock before resolving it.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::error::{ModemError, Result};
use super::line::Line;

/// Outcome of offering one line to a matcher
#[derive(Debug)]
pub enum Step<T> {
    /// Not (yet) complete; the line is left for later transactions
    Pending,
    /// The line completed the transaction
    Done(Result<T>),
}

/// Decides which lines answer a transaction
///
/// Matchers may keep state between lines, which is how multi-line
/// exchanges such as a position fix are assembled.
pub trait LineMatcher: Send + 'static {
    type Output: Send + 'static;

    /// Inspect one line
    fn offer(&mut self, line: &Line) -> Step<Self::Output>;

    /// Result delivered when the deadline passes first
    fn expire(self) -> Result<Self::Output>
    where
        Self: Sized,
    {
        Err(ModemError::Timeout)
    }
}

/// Closure matcher, see [`TransactionRegistry::register_fn`]
pub struct FnMatcher<F>(F);

impl<T, F> LineMatcher for FnMatcher<F>
where
    T: Send + 'static,
    F: FnMut(&Line) -> Option<Result<T>> + Send + 'static,
{
    type Output = T;

    fn offer(&mut self, line: &Line) -> Step<T> {
        match (self.0)(line) {
            Some(result) => Step::Done(result),
            None => Step::Pending,
        }
    }
}

/// Type-erased registry entry
trait PendingEntry: Send {
    /// Returns true when the line completed the entry
    fn offer(&mut self, line: &Line) -> bool;
    fn expire(self: Box<Self>);
}

struct Entry<M: LineMatcher> {
    matcher: M,
    reply: Option<oneshot::Sender<Result<M::Output>>>,
}

impl<M: LineMatcher> PendingEntry for Entry<M> {
    fn offer(&mut self, line: &Line) -> bool {
        match self.matcher.offer(line) {
            Step::Pending => false,
            Step::Done(result) => {
                if let Some(reply) = self.reply.take() {
                    // Receiver gone means the caller stopped waiting
                    let _ = reply.send(result);
                }
                true
            }
        }
    }

    fn expire(self: Box<Self>) {
        let Entry { matcher, reply } = *self;
        if let Some(reply) = reply {
            let _ = reply.send(matcher.expire());
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    pending: Vec<(u64, Box<dyn PendingEntry>)>,
}

/// Ordered set of outstanding transactions
#[derive(Clone, Default)]
pub struct TransactionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl TransactionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a matcher that must complete within `timeout`
    ///
    /// The returned [`Transaction`] resolves with the matcher's result, or
    /// with its expiry result once the deadline passes.
    pub fn register<M: LineMatcher>(&self, matcher: M, timeout: Duration) -> Transaction<M::Output> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.pending.push((
            id,
            Box::new(Entry {
                matcher,
                reply: Some(tx),
            }),
        ));
        trace!("Registered transaction {} ({:?})", id, timeout);

        Transaction {
            id,
            registry: self.clone(),
            rx,
            deadline: Instant::now() + timeout,
            finished: false,
        }
    }

    /// Register a closure matcher; `None` means "not my line"
    pub fn register_fn<T, F>(&self, timeout: Duration, f: F) -> Transaction<T>
    where
        T: Send + 'static,
        F: FnMut(&Line) -> Option<Result<T>> + Send + 'static,
    {
        self.register(FnMatcher(f), timeout)
    }

    /// Offer a line to the outstanding transactions in registration order
    ///
    /// Stops at the first transaction the line completes and removes it.
    /// Returns whether any transaction consumed the line.
    pub fn dispatch(&self, line: &Line) -> bool {
        let mut inner = self.inner.lock();
        let position = inner.pending.iter_mut().position(|(_, entry)| entry.offer(line));
        match position {
            Some(index) => {
                let (id, _) = inner.pending.remove(index);
                debug!("Transaction {} completed by {:?}", id, line.text());
                true
            }
            None => false,
        }
    }

    /// Number of outstanding transactions
    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove an entry and deliver its expiry result
    fn expire(&self, id: u64) {
        let entry = self.take(id);
        if let Some(entry) = entry {
            debug!("Transaction {} expired", id);
            entry.expire();
        }
    }

    /// Remove an entry without resolving it
    fn cancel(&self, id: u64) {
        if self.take(id).is_some() {
            trace!("Transaction {} dropped before completion", id);
        }
    }

    fn take(&self, id: u64) -> Option<Box<dyn PendingEntry>> {
        let mut inner = self.inner.lock();
        let index = inner.pending.iter().position(|(entry_id, _)| *entry_id == id)?;
        Some(inner.pending.remove(index).1)
    }
}

impl std::fmt::Debug for TransactionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionRegistry")
            .field("pending", &self.len())
            .finish()
    }
}

/// Handle to one registered transaction
///
/// Await it (or call [`Transaction::wait`]) for the result. Dropping it
/// unawaited removes the registry entry.
#[must_use = "a transaction does nothing unless awaited"]
pub struct Transaction<T> {
    id: u64,
    registry: TransactionRegistry,
    rx: oneshot::Receiver<Result<T>>,
    deadline: Instant,
    finished: bool,
}

impl<T> Transaction<T> {
    /// Registry id, monotonic per registry
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the match or the deadline, whichever comes first
    pub async fn wait(mut self) -> Result<T> {
        let outcome = tokio::time::timeout_at(self.deadline, &mut self.rx).await;
        self.finished = true;
        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ModemError::ChannelClosed),
            Err(_) => {
                // A line may have completed the entry just before expiry;
                // whichever path removed it has already sent the reply.
                self.registry.expire(self.id);
                self.rx.try_recv().unwrap_or(Err(ModemError::Timeout))
            }
        }
    }
}

impl<T: Send + 'static> IntoFuture for Transaction<T> {
    type Output = Result<T>;
    type IntoFuture = BoxFuture<'static, Result<T>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

impl<T> Drop for Transaction<T> {
    fn drop(&mut self) {
        if !self.finished {
            self.registry.cancel(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str) -> Line {
        Line::classify(text).unwrap()
    }

    fn exact(expected: &'static str) -> impl FnMut(&Line) -> Option<Result<String>> + Send {
        move |l: &Line| (l.text() == expected).then(|| Ok(l.text().to_string()))
    }

    /// Collects `+LIST: n` lines until `OK`, yields them on expiry
    struct Collect(Vec<String>);

    impl LineMatcher for Collect {
        type Output = Vec<String>;

        fn offer(&mut self, line: &Line) -> Step<Vec<String>> {
            if line.text() == "OK" {
                return Step::Done(Ok(std::mem::take(&mut self.0)));
            }
            if line.starts_with("+LIST") {
                self.0.push(line.text().to_string());
            }
            Step::Pending
        }

        fn expire(self) -> Result<Vec<String>> {
            Ok(self.0)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_match_resolves_and_removes_entry() {
        let registry = TransactionRegistry::new();
        let tx = registry.register_fn(Duration::from_secs(2), exact("OK"));
        assert_eq!(registry.len(), 1);

        assert!(!registry.dispatch(&line("ERROR")));
        assert!(registry.dispatch(&line("OK")));
        assert!(registry.is_empty());
        assert_eq!(tx.await.unwrap(), "OK");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_entry() {
        let registry = TransactionRegistry::new();
        let tx = registry.register_fn(Duration::from_secs(2), exact("OK"));

        let result = tx.await;
        assert!(matches!(result, Err(ModemError::Timeout)));
        assert!(registry.is_empty());
        // A late line no longer reaches anyone
        assert!(!registry.dispatch(&line("OK")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_match_wins_in_registration_order() {
        let registry = TransactionRegistry::new();
        let first = registry.register_fn(Duration::from_secs(5), exact("OK"));
        let second = registry.register_fn(Duration::from_secs(5), exact("OK"));
        assert!(first.id() < second.id());

        assert!(registry.dispatch(&line("OK")));
        assert_eq!(registry.len(), 1);
        assert_eq!(first.await.unwrap(), "OK");

        assert!(registry.dispatch(&line("OK")));
        assert!(registry.is_empty());
        assert_eq!(second.await.unwrap(), "OK");
    }

    #[tokio::test(start_paused = true)]
    async fn test_line_skips_non_matching_transactions() {
        let registry = TransactionRegistry::new();
        let clock = registry.register_fn(Duration::from_secs(2), |l: &Line| {
            l.starts_with("+CCLK").then(|| Ok(1))
        });
        let temp = registry.register_fn(Duration::from_secs(2), |l: &Line| {
            l.starts_with("+KGTEMP").then(|| Ok(2))
        });

        assert!(registry.dispatch(&line("+KGTEMP: +30")));
        assert_eq!(temp.await.unwrap(), 2);
        assert_eq!(registry.len(), 1);
        drop(clock);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stateful_matcher_and_custom_expiry() {
        let registry = TransactionRegistry::new();
        let done = registry.register(Collect(Vec::new()), Duration::from_secs(1));
        assert!(!registry.dispatch(&line("+LIST: 1")));
        assert!(!registry.dispatch(&line("+LIST: 2")));
        assert!(registry.dispatch(&line("OK")));
        assert_eq!(done.await.unwrap(), vec!["+LIST: 1", "+LIST: 2"]);

        let partial = registry.register(Collect(Vec::new()), Duration::from_secs(1));
        registry.dispatch(&line("+LIST: 3"));
        assert_eq!(partial.await.unwrap(), vec!["+LIST: 3"]);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_deadlines() {
        let registry = TransactionRegistry::new();
        let short = registry.register_fn(Duration::from_secs(1), exact("A"));
        let long = registry.register_fn(Duration::from_secs(10), exact("B"));

        assert!(short.await.unwrap_err().is_timeout());
        assert_eq!(registry.len(), 1);

        let waiter = tokio::spawn(long.into_future());
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(registry.dispatch(&line("B")));
        assert_eq!(waiter.await.unwrap().unwrap(), "B");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_transaction_leaves_no_entry() {
        let registry = TransactionRegistry::new();
        let tx = registry.register_fn(Duration::from_secs(2), exact("OK"));
        assert_eq!(registry.len(), 1);
        drop(tx);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_match_at_deadline_resolves_once() {
        let registry = TransactionRegistry::new();
        let tx = registry.register_fn(Duration::from_secs(2), exact("OK"));
        tokio::time::advance(Duration::from_secs(2)).await;
        // The line lands after the deadline but before the waiter is polled
        assert!(registry.dispatch(&line("OK")));
        assert_eq!(tx.await.unwrap(), "OK");
        assert!(registry.is_empty());
    }
}
