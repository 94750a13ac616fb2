//! EventHandler - 購読者への弱参照 + コールバック
//!
//! # 設計
//! - 購読者は `Weak` で保持する（registry が購読者を生かし続けない）
//! - コールバックは `Arc` で所有する（寿命は registry 側）
//! - 同一性 = 購読者のアドレス + コールバックの識別子
//!   - `fn` で作った handler は同じ関数から作り直しても一致する（アドレス比較）
//!   - クロージャで作った handler は clone したものだけが一致する
//! - 購読者なし（static）の handler は生存チェックの対象外

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

/// Object-safe shape every callback is erased to: (target, sender, args).
type Callback<A> =
    Arc<dyn Fn(Option<&(dyn Any + Send + Sync)>, Option<&dyn Any>, &A) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallbackId {
    /// Address of a `fn` item; equal for rebuilds in the same codegen unit.
    Function(usize),
    /// Address of the shared closure allocation.
    Closure(usize),
}

pub(crate) enum Liveness {
    Static,
    Alive(Arc<dyn Any + Send + Sync>),
    Dead,
}

/// One subscription's worth of callback, bound to an optional subscriber.
pub struct EventHandler<A: ?Sized + 'static> {
    target: Option<Weak<dyn Any + Send + Sync>>,
    callback: Callback<A>,
    callback_id: CallbackId,
}

impl<A: ?Sized + 'static> EventHandler<A> {
    /// Bind a method of `subscriber`.
    ///
    /// Identity is the address of `method`, so an equal handler can be
    /// rebuilt for removal. Function addresses are not guaranteed unique:
    /// the compiler may merge identical bodies (two such methods then match
    /// each other) or give one function distinct addresses in different
    /// codegen units (a rebuilt handler then fails to match). Keep the
    /// handler and remove a clone of it when that matters.
    ///
    /// ```ignore
    /// let h = EventHandler::method(&view, FeedView::on_refreshed);
    /// manager.add_event_handler(h, "Refreshed")?;
    /// // later: an identical handler can be rebuilt for removal
    /// manager.remove_event_handler(&EventHandler::method(&view, FeedView::on_refreshed), "Refreshed")?;
    /// ```
    pub fn method<T>(subscriber: &Arc<T>, method: fn(&T, Option<&dyn Any>, &A)) -> Self
    where
        T: Any + Send + Sync,
    {
        Self::bound(
            subscriber,
            CallbackId::Function(method as usize),
            erase(move |target, sender, args| {
                if let Some(t) = target.and_then(|t| t.downcast_ref::<T>()) {
                    method(t, sender, args);
                }
            }),
        )
    }

    /// Bind a sender-less method of `subscriber`. Same identity caveat as
    /// [`EventHandler::method`].
    pub fn action<T>(subscriber: &Arc<T>, method: fn(&T, &A)) -> Self
    where
        T: Any + Send + Sync,
    {
        Self::bound(
            subscriber,
            CallbackId::Function(method as usize),
            erase(move |target, _sender, args| {
                if let Some(t) = target.and_then(|t| t.downcast_ref::<T>()) {
                    method(t, args);
                }
            }),
        )
    }

    /// Bind a closure to `subscriber`. Only clones of the returned handler
    /// match it on removal.
    pub fn closure<T, F>(subscriber: &Arc<T>, f: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&T, Option<&dyn Any>, &A) + Send + Sync + 'static,
    {
        let callback = erase(move |target, sender, args| {
            if let Some(t) = target.and_then(|t| t.downcast_ref::<T>()) {
                f(t, sender, args);
            }
        });
        let id = CallbackId::Closure(closure_addr(&callback));
        Self::bound(subscriber, id, callback)
    }

    /// Static handler: no subscriber, never pruned. Same identity caveat as
    /// [`EventHandler::method`].
    pub fn function(f: fn(Option<&dyn Any>, &A)) -> Self {
        Self {
            target: None,
            callback: erase(move |_target, sender, args| f(sender, args)),
            callback_id: CallbackId::Function(f as usize),
        }
    }

    /// Static closure handler.
    pub fn static_closure<F>(f: F) -> Self
    where
        F: Fn(Option<&dyn Any>, &A) + Send + Sync + 'static,
    {
        let callback = erase(move |_target, sender, args| f(sender, args));
        Self {
            target: None,
            callback_id: CallbackId::Closure(closure_addr(&callback)),
            callback,
        }
    }

    fn bound<T>(subscriber: &Arc<T>, callback_id: CallbackId, callback: Callback<A>) -> Self
    where
        T: Any + Send + Sync,
    {
        let target = Arc::downgrade(subscriber);
        let target: Weak<dyn Any + Send + Sync> = target;
        Self {
            target: Some(target),
            callback,
            callback_id,
        }
    }

    pub fn is_static(&self) -> bool {
        self.target.is_none()
    }

    /// `false` once the subscriber has been dropped. Static handlers are
    /// always alive.
    pub fn is_alive(&self) -> bool {
        !matches!(self.liveness(), Liveness::Dead)
    }

    pub(crate) fn liveness(&self) -> Liveness {
        match &self.target {
            None => Liveness::Static,
            Some(weak) => match weak.upgrade() {
                Some(strong) => Liveness::Alive(strong),
                None => Liveness::Dead,
            },
        }
    }

    /// Same subscriber and same callback.
    pub(crate) fn same_as(&self, other: &EventHandler<A>) -> bool {
        if self.callback_id != other.callback_id {
            return false;
        }
        match (&self.target, &other.target) {
            (None, None) => true,
            // subscription が Weak を握っている間はアドレスが再利用されない
            (Some(a), Some(b)) => std::ptr::addr_eq(a.as_ptr(), b.as_ptr()),
            _ => false,
        }
    }

    pub(crate) fn invoke(
        &self,
        target: Option<&(dyn Any + Send + Sync)>,
        sender: Option<&dyn Any>,
        args: &A,
    ) {
        (self.callback)(target, sender, args);
    }
}

fn erase<A, F>(f: F) -> Callback<A>
where
    A: ?Sized + 'static,
    F: Fn(Option<&(dyn Any + Send + Sync)>, Option<&dyn Any>, &A) + Send + Sync + 'static,
{
    Arc::new(f)
}

fn closure_addr<A: ?Sized>(callback: &Callback<A>) -> usize {
    Arc::as_ptr(callback) as *const () as usize
}

impl<A: ?Sized + 'static> Clone for EventHandler<A> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            callback: Arc::clone(&self.callback),
            callback_id: self.callback_id,
        }
    }
}

impl<A: ?Sized + 'static> fmt::Debug for EventHandler<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandler")
            .field("static", &self.is_static())
            .field("alive", &self.is_alive())
            .field("callback_id", &self.callback_id)
            .finish()
    }
}
