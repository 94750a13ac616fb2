//! WeakEventManager - 弱参照ベースのイベント登録簿
//!
//! # dispatch の手順（handle_event 1 回ごと）
//! 1. イベント名のリストを snapshot（ロック中は clone だけ）
//! 2. snapshot を「呼ぶ」と「刈る」に分ける（購読者が生きているか）
//! 3. 「刈る」ものを本体のテーブルから削除
//! 4. ロックを外してから「呼ぶ」ものを登録順に呼ぶ
//!    （2 で upgrade した `Arc` を握ったまま呼ぶので途中で消えない）
//!
//! handler の中から add/remove しても snapshot には影響しません。

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::handler::{EventHandler, Liveness};
use crate::domain::{KiteError, KiteResult};

/// Named events whose subscribers are held weakly.
///
/// `A` is the argument type handed to every handler. The default,
/// `dyn Any`, gives an untyped manager where handlers downcast the args
/// themselves; typed and untyped managers share the same algorithm.
pub struct WeakEventManager<A: ?Sized + 'static = dyn Any> {
    table: Mutex<HashMap<String, Vec<EventHandler<A>>>>,
}

impl<A: ?Sized + 'static> WeakEventManager<A> {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe `handler` to `event_name`.
    ///
    /// # Errors
    /// `InvalidArgument` when the name is blank or the handler's subscriber
    /// is already gone. Nothing is registered in that case.
    pub fn add_event_handler(&self, handler: EventHandler<A>, event_name: &str) -> KiteResult<()> {
        validate_event_name(event_name)?;
        if !handler.is_alive() {
            return Err(KiteError::invalid_argument(
                "handler",
                "subscriber has already been dropped",
            ));
        }

        self.lock()
            .entry(event_name.to_string())
            .or_default()
            .push(handler);
        Ok(())
    }

    /// Unsubscribe the most recently added handler matching `handler`.
    ///
    /// Unknown names and missing handlers are a no-op.
    pub fn remove_event_handler(&self, handler: &EventHandler<A>, event_name: &str) -> KiteResult<()> {
        validate_event_name(event_name)?;

        let mut table = self.lock();
        let Some(handlers) = table.get_mut(event_name) else {
            return Ok(());
        };
        if let Some(pos) = handlers.iter().rposition(|h| h.same_as(handler)) {
            handlers.remove(pos);
        }
        if handlers.is_empty() {
            table.remove(event_name);
        }
        Ok(())
    }

    /// Invoke every live handler of `event_name` with `(sender, args)`.
    ///
    /// Handlers whose subscriber was dropped are removed as a side effect.
    /// An unknown name is a no-op.
    pub fn handle_event(&self, sender: Option<&dyn Any>, args: &A, event_name: &str) {
        let snapshot = match self.lock().get(event_name) {
            Some(handlers) => handlers.clone(),
            None => return,
        };

        let mut invoke = Vec::with_capacity(snapshot.len());
        let mut pruned = 0usize;
        for handler in snapshot {
            match handler.liveness() {
                Liveness::Static => invoke.push((handler, None)),
                Liveness::Alive(target) => invoke.push((handler, Some(target))),
                Liveness::Dead => pruned += 1,
            }
        }

        if pruned > 0 {
            self.prune(event_name);
            tracing::debug!(event_name, pruned, "pruned subscriptions of dropped subscribers");
        }

        for (handler, target) in &invoke {
            handler.invoke(target.as_deref(), sender, args);
        }
    }

    /// `handle_event` without a sender.
    pub fn raise_event(&self, args: &A, event_name: &str) {
        self.handle_event(None, args, event_name);
    }

    /// Number of subscriptions currently stored for `event_name`, dead ones
    /// included until the next dispatch prunes them.
    pub fn subscription_count(&self, event_name: &str) -> usize {
        self.lock().get(event_name).map_or(0, Vec::len)
    }

    fn prune(&self, event_name: &str) {
        let mut table = self.lock();
        if let Some(handlers) = table.get_mut(event_name) {
            handlers.retain(EventHandler::is_alive);
            if handlers.is_empty() {
                table.remove(event_name);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<EventHandler<A>>>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<A: ?Sized + 'static> Default for WeakEventManager<A> {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_event_name(event_name: &str) -> KiteResult<()> {
    if event_name.trim().is_empty() {
        return Err(KiteError::invalid_argument(
            "event_name",
            "must not be empty or whitespace",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, OnceLock, Weak};

    const CHANGED: &str = "Changed";

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn new(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                log: Arc::clone(log),
            })
        }

        fn on_changed(&self, _sender: Option<&dyn Any>, args: &i32) {
            self.log.lock().unwrap().push(format!("{}:{args}", self.name));
        }

        fn on_changed_untyped(&self, _sender: Option<&dyn Any>, args: &dyn Any) {
            let args = args.downcast_ref::<i32>().copied().unwrap_or(-1);
            self.log.lock().unwrap().push(format!("{}:{args}", self.name));
        }
    }

    fn log() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn live_handlers_run_once_in_insertion_order() {
        let log = log();
        let manager = WeakEventManager::<i32>::new();
        let first = Recorder::new("first", &log);
        let second = Recorder::new("second", &log);

        manager
            .add_event_handler(EventHandler::method(&first, Recorder::on_changed), CHANGED)
            .unwrap();
        manager
            .add_event_handler(EventHandler::method(&second, Recorder::on_changed), CHANGED)
            .unwrap();

        manager.handle_event(None, &1, CHANGED);

        assert_eq!(*log.lock().unwrap(), vec!["first:1", "second:1"]);
    }

    #[test]
    fn dropped_subscriber_is_skipped_and_pruned() {
        let log = log();
        let manager = WeakEventManager::<i32>::new();
        let kept = Recorder::new("kept", &log);
        let gone = Recorder::new("gone", &log);

        manager
            .add_event_handler(EventHandler::method(&gone, Recorder::on_changed), CHANGED)
            .unwrap();
        manager
            .add_event_handler(EventHandler::method(&kept, Recorder::on_changed), CHANGED)
            .unwrap();
        drop(gone);
        assert_eq!(manager.subscription_count(CHANGED), 2);

        manager.handle_event(None, &5, CHANGED);

        assert_eq!(*log.lock().unwrap(), vec!["kept:5"]);
        assert_eq!(manager.subscription_count(CHANGED), 1);
    }

    #[test]
    fn removed_handler_is_not_invoked() {
        let log = log();
        let manager = WeakEventManager::<i32>::new();
        let r = Recorder::new("r", &log);

        manager
            .add_event_handler(EventHandler::method(&r, Recorder::on_changed), CHANGED)
            .unwrap();
        manager
            .remove_event_handler(&EventHandler::method(&r, Recorder::on_changed), CHANGED)
            .unwrap();
        manager.handle_event(None, &1, CHANGED);

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(manager.subscription_count(CHANGED), 0);
    }

    #[test]
    fn remove_takes_only_the_latest_duplicate() {
        let log = log();
        let manager = WeakEventManager::<i32>::new();
        let r = Recorder::new("r", &log);
        let h = EventHandler::method(&r, Recorder::on_changed);

        manager.add_event_handler(h.clone(), CHANGED).unwrap();
        manager.add_event_handler(h.clone(), CHANGED).unwrap();
        manager.remove_event_handler(&h, CHANGED).unwrap();
        manager.handle_event(None, &2, CHANGED);

        assert_eq!(*log.lock().unwrap(), vec!["r:2"]);
    }

    #[test]
    fn removing_unknown_handler_or_event_is_a_noop() {
        let log = log();
        let manager = WeakEventManager::<i32>::new();
        let r = Recorder::new("r", &log);
        let h = EventHandler::method(&r, Recorder::on_changed);

        assert!(manager.remove_event_handler(&h, "NeverSeen").is_ok());

        manager.add_event_handler(h, CHANGED).unwrap();
        let other = EventHandler::<i32>::closure(&r, |_r, _s, _a| {});
        assert!(manager.remove_event_handler(&other, CHANGED).is_ok());
        assert_eq!(manager.subscription_count(CHANGED), 1);
    }

    #[test]
    fn unknown_event_is_a_noop() {
        let manager = WeakEventManager::<i32>::new();
        manager.handle_event(None, &1, "Nobody");
        manager.raise_event(&1, "Nobody");
        assert_eq!(manager.subscription_count("Nobody"), 0);
    }

    #[rstest]
    #[case::empty("")]
    #[case::spaces("   ")]
    #[case::tab("\t")]
    fn blank_event_name_is_rejected(#[case] name: &str) {
        let log = log();
        let manager = WeakEventManager::<i32>::new();
        let r = Recorder::new("r", &log);
        let h = EventHandler::method(&r, Recorder::on_changed);

        let err = manager.add_event_handler(h.clone(), name).unwrap_err();
        assert!(matches!(err, KiteError::InvalidArgument { name: "event_name", .. }));
        assert!(manager.remove_event_handler(&h, name).is_err());
        assert_eq!(manager.subscription_count(name), 0);
    }

    #[test]
    fn handler_of_dropped_subscriber_is_rejected() {
        let log = log();
        let manager = WeakEventManager::<i32>::new();
        let r = Recorder::new("r", &log);
        let h = EventHandler::method(&r, Recorder::on_changed);
        drop(r);

        let err = manager.add_event_handler(h, CHANGED).unwrap_err();
        assert!(matches!(err, KiteError::InvalidArgument { name: "handler", .. }));
        assert_eq!(manager.subscription_count(CHANGED), 0);
    }

    #[test]
    fn manager_does_not_keep_subscriber_alive() {
        let log = log();
        let manager = WeakEventManager::<i32>::new();
        let r = Recorder::new("r", &log);
        let weak = Arc::downgrade(&r);

        manager
            .add_event_handler(EventHandler::method(&r, Recorder::on_changed), CHANGED)
            .unwrap();
        drop(r);

        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn static_handlers_are_never_pruned() {
        static HITS: AtomicUsize = AtomicUsize::new(0);
        fn on_changed(_sender: Option<&dyn Any>, _args: &i32) {
            HITS.fetch_add(1, Ordering::SeqCst);
        }

        let manager = WeakEventManager::<i32>::new();
        manager
            .add_event_handler(EventHandler::function(on_changed), CHANGED)
            .unwrap();

        manager.raise_event(&1, CHANGED);
        manager.raise_event(&2, CHANGED);

        assert_eq!(HITS.load(Ordering::SeqCst), 2);
        assert_eq!(manager.subscription_count(CHANGED), 1);
    }

    #[test]
    fn handler_can_unsubscribe_itself_during_dispatch() {
        let manager = Arc::new(WeakEventManager::<i32>::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let later_hits = Arc::new(AtomicUsize::new(0));

        let me: Arc<OnceLock<EventHandler<i32>>> = Arc::new(OnceLock::new());
        let (m, slot, h) = (Arc::downgrade(&manager), Arc::clone(&me), Arc::clone(&hits));
        let once = EventHandler::static_closure(move |_sender, _args: &i32| {
            h.fetch_add(1, Ordering::SeqCst);
            if let (Some(manager), Some(me)) = (Weak::upgrade(&m), slot.get()) {
                manager.remove_event_handler(me, CHANGED).unwrap();
            }
        });
        me.set(once.clone()).unwrap();

        let l = Arc::clone(&later_hits);
        manager.add_event_handler(once, CHANGED).unwrap();
        manager
            .add_event_handler(
                EventHandler::static_closure(move |_sender, _args: &i32| {
                    l.fetch_add(1, Ordering::SeqCst);
                }),
                CHANGED,
            )
            .unwrap();

        manager.raise_event(&1, CHANGED);
        manager.raise_event(&2, CHANGED);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(later_hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn handler_added_during_dispatch_runs_next_time() {
        let manager = Arc::new(WeakEventManager::<i32>::new());
        let added_hits = Arc::new(AtomicUsize::new(0));

        let (m, a) = (Arc::downgrade(&manager), Arc::clone(&added_hits));
        let adder = EventHandler::static_closure(move |_sender, _args: &i32| {
            let Some(manager) = Weak::upgrade(&m) else {
                return;
            };
            if manager.subscription_count(CHANGED) == 1 {
                let a = Arc::clone(&a);
                manager
                    .add_event_handler(
                        EventHandler::static_closure(move |_sender, _args: &i32| {
                            a.fetch_add(1, Ordering::SeqCst);
                        }),
                        CHANGED,
                    )
                    .unwrap();
            }
        });
        manager.add_event_handler(adder, CHANGED).unwrap();

        manager.raise_event(&1, CHANGED);
        assert_eq!(added_hits.load(Ordering::SeqCst), 0);

        manager.raise_event(&2, CHANGED);
        assert_eq!(added_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sender_is_passed_through() {
        let manager = WeakEventManager::<i32>::new();
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        manager
            .add_event_handler(
                EventHandler::static_closure(move |sender, _args: &i32| {
                    *s.lock().unwrap() = sender.and_then(|x| x.downcast_ref::<&str>()).copied();
                }),
                CHANGED,
            )
            .unwrap();

        let publisher = "feed-view-model";
        manager.handle_event(Some(&publisher), &0, CHANGED);

        assert_eq!(*seen.lock().unwrap(), Some("feed-view-model"));
    }

    #[test]
    fn typed_and_untyped_managers_agree() {
        let typed_log = log();
        let untyped_log = log();
        let typed = WeakEventManager::<i32>::new();
        let untyped: WeakEventManager = WeakEventManager::new();

        let t1 = Recorder::new("a", &typed_log);
        let t2 = Recorder::new("b", &typed_log);
        let u1 = Recorder::new("a", &untyped_log);
        let u2 = Recorder::new("b", &untyped_log);

        typed
            .add_event_handler(EventHandler::method(&t1, Recorder::on_changed), CHANGED)
            .unwrap();
        typed
            .add_event_handler(EventHandler::method(&t2, Recorder::on_changed), CHANGED)
            .unwrap();
        untyped
            .add_event_handler(EventHandler::<dyn Any>::method(&u1, Recorder::on_changed_untyped), CHANGED)
            .unwrap();
        untyped
            .add_event_handler(EventHandler::<dyn Any>::method(&u2, Recorder::on_changed_untyped), CHANGED)
            .unwrap();

        drop(t1);
        drop(u1);
        typed.handle_event(None, &9, CHANGED);
        untyped.handle_event(None, &9, CHANGED);

        assert_eq!(*typed_log.lock().unwrap(), *untyped_log.lock().unwrap());
        assert_eq!(typed.subscription_count(CHANGED), untyped.subscription_count(CHANGED));
    }

    #[test]
    fn action_handlers_ignore_the_sender() {
        struct Tally(AtomicUsize);
        impl Tally {
            fn bump(&self, by: &usize) {
                self.0.fetch_add(*by, Ordering::SeqCst);
            }
        }

        let manager = WeakEventManager::<usize>::new();
        let tally = Arc::new(Tally(AtomicUsize::new(0)));
        manager
            .add_event_handler(EventHandler::action(&tally, Tally::bump), CHANGED)
            .unwrap();

        manager.handle_event(Some(&"sender"), &3, CHANGED);
        manager.raise_event(&4, CHANGED);

        assert_eq!(tally.0.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn concurrent_add_and_dispatch_do_not_tear() {
        let manager = Arc::new(WeakEventManager::<i32>::new());
        let hits = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let (manager, hits) = (Arc::clone(&manager), Arc::clone(&hits));
                scope.spawn(move || {
                    for i in 0..50 {
                        let h = Arc::clone(&hits);
                        manager
                            .add_event_handler(
                                EventHandler::static_closure(move |_s, _a: &i32| {
                                    h.fetch_add(1, Ordering::Relaxed);
                                }),
                                CHANGED,
                            )
                            .unwrap();
                        manager.raise_event(&i, CHANGED);
                    }
                });
            }
        });

        assert_eq!(manager.subscription_count(CHANGED), 200);
        hits.store(0, Ordering::SeqCst);
        manager.raise_event(&0, CHANGED);
        assert_eq!(hits.load(Ordering::SeqCst), 200);
    }
}
