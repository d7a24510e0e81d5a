use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::TransportError;

/// Smallest number of participants out of `n` that any two quorums share.
pub fn majority(n: usize) -> usize {
    n / 2 + 1
}

/// One peer's reply to a broadcast call.
#[derive(Debug)]
pub struct Reply<T> {
    pub peer: String,
    pub result: Result<T, TransportError>,
}

/// Something a broadcast can be addressed to.
pub trait Peer: Send + Sync {
    fn peer_id(&self) -> &str;
}

/// Sends one call per peer concurrently and streams the replies back as they
/// arrive.
///
/// Each call is its own task bounded by `call_timeout`; a call that runs out
/// of time yields [`TransportError::Timeout`]. Dropping the receiver stops
/// listening but lets in-flight calls finish, so nothing already sent is
/// rolled back. The channel closes once every call has produced a reply.
pub fn broadcast<P, F, Fut, T>(
    peers: &[Arc<P>],
    call_timeout: Duration,
    call: F,
) -> mpsc::UnboundedReceiver<Reply<T>>
where
    P: Peer + ?Sized + 'static,
    F: Fn(Arc<P>) -> Fut,
    Fut: Future<Output = Result<T, TransportError>> + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    for peer in peers {
        let peer_id = peer.peer_id().to_string();
        let fut = call(Arc::clone(peer));
        let tx = tx.clone();
        tokio::spawn(async move {
            let result = match tokio::time::timeout(call_timeout, fut).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout {
                    peer: peer_id.clone(),
                    timeout_ms: call_timeout.as_millis() as u64,
                }),
            };
            // The collector may have stopped listening already.
            let _ = tx.send(Reply {
                peer: peer_id,
                result,
            });
        });
    }
    rx
}

/// Running count of a quorum vote among `total` participants.
#[derive(Debug, Clone)]
pub struct Tally {
    total: usize,
    needed: usize,
    pub yes: usize,
    pub no: usize,
    pub silent: usize,
}

impl Tally {
    pub fn new(total: usize) -> Self {
        Tally {
            total,
            needed: majority(total),
            yes: 0,
            no: 0,
            silent: 0,
        }
    }

    pub fn needed(&self) -> usize {
        self.needed
    }

    pub fn reached(&self) -> bool {
        self.yes >= self.needed
    }

    /// True once the outstanding replies can no longer produce a majority.
    pub fn foreclosed(&self) -> bool {
        let outstanding = self.total - self.yes - self.no - self.silent;
        self.yes + outstanding < self.needed
    }

    pub fn decided(&self) -> bool {
        self.reached() || self.foreclosed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn majority_of_small_clusters() {
        let expected = [(1, 1), (2, 2), (3, 2), (4, 3), (5, 3)];
        for (n, m) in expected {
            assert_eq!(majority(n), m, "majority({}) should be {}", n, m);
        }
    }

    #[test]
    fn tally_decides_early() {
        let mut tally = Tally::new(5);
        assert_eq!(tally.needed(), 3);
        tally.yes = 2;
        tally.no = 1;
        assert!(!tally.decided(), "two replies still outstanding");
        tally.silent = 1;
        assert!(!tally.reached());
        assert!(!tally.foreclosed(), "a single yes could still make 3");
        tally.no = 2;
        assert!(tally.foreclosed());

        let mut tally = Tally::new(3);
        tally.yes = 2;
        assert!(tally.reached());
    }

    #[test]
    fn tally_of_nobody_is_foreclosed() {
        let tally = Tally::new(0);
        assert!(tally.foreclosed(), "an empty cluster can never reach a majority");
    }

    struct Slow {
        id: String,
        delay: Duration,
    }

    impl Peer for Slow {
        fn peer_id(&self) -> &str {
            &self.id
        }
    }

    #[tokio::test]
    async fn broadcast_reports_timeouts_per_peer() {
        let peers = vec![
            Arc::new(Slow {
                id: "fast".into(),
                delay: Duration::from_millis(1),
            }),
            Arc::new(Slow {
                id: "slow".into(),
                delay: Duration::from_secs(5),
            }),
        ];
        let mut rx = broadcast(&peers, Duration::from_millis(100), |p| async move {
            tokio::time::sleep(p.delay).await;
            Ok::<_, TransportError>(p.id.clone())
        });

        let mut ok = Vec::new();
        let mut timed_out = Vec::new();
        while let Some(reply) = rx.recv().await {
            match reply.result {
                Ok(id) => ok.push(id),
                Err(e) => {
                    assert!(e.is_timeout(), "unexpected error {e}");
                    timed_out.push(reply.peer);
                }
            }
        }
        assert_eq!(ok, vec!["fast".to_string()]);
        assert_eq!(timed_out, vec!["slow".to_string()]);
    }
}
