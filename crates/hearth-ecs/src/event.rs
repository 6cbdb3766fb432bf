//! Typed event routing to per-component and global handlers.
//!
//! Handlers subscribe for an `(event type, component type)` pair and run when
//! that event is raised on an entity carrying the component. Global handlers
//! run for every entity. Handlers for one dispatch run in ascending order key
//! (default `0`), ties broken by registration order.
//!
//! Dispatch works from a snapshot of the matching subscriptions, so handlers
//! may subscribe, unsubscribe, add or remove components freely. An
//! unsubscribed handler that has not yet run in the current dispatch is
//! skipped. Once an event reports [`EntityEvent::is_handled`], the remaining
//! handlers are skipped.

use crate::component::ComponentTypeId;
use crate::entity::EntityId;
use crate::prototype::PrototypeId;
use std::any::{Any, TypeId};
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

// ---------------------------------------------------------------------------
// EntityEvent
// ---------------------------------------------------------------------------

/// Marker for event payloads.
///
/// Events that can be claimed by a handler override [`is_handled`](Self::is_handled).
pub trait EntityEvent: 'static {
    fn is_handled(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

/// Handle returned by subscription; pass it to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type HandlerFn<C, E> = dyn Fn(&mut C, EntityId, &mut E) -> anyhow::Result<()>;

/// One registered handler.
pub struct Subscription<C: 'static, E: 'static> {
    id: SubscriptionId,
    order: i32,
    active: Cell<bool>,
    handler: Box<HandlerFn<C, E>>,
}

impl<C: 'static, E: 'static> Subscription<C, E> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    fn sort_key(&self) -> (i32, SubscriptionId) {
        (self.order, self.id)
    }
}

impl<C: 'static, E: 'static> fmt::Debug for Subscription<C, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("order", &self.order)
            .field("active", &self.active.get())
            .finish()
    }
}

/// Snapshot of the handlers selected for one dispatch.
pub type HandlerList<C, E> = Vec<Rc<Subscription<C, E>>>;

struct HandlerTable<C: 'static, E: 'static> {
    by_component: HashMap<ComponentTypeId, HandlerList<C, E>>,
    global: HandlerList<C, E>,
}

impl<C: 'static, E: 'static> HandlerTable<C, E> {
    fn new() -> Self {
        Self {
            by_component: HashMap::new(),
            global: Vec::new(),
        }
    }
}

/// Object-safe face of a `HandlerTable<C, E>` for one event type.
trait ErasedTable {
    fn remove(&mut self, id: SubscriptionId) -> bool;
    fn len(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

fn strip<C: 'static, E: 'static>(list: &mut HandlerList<C, E>, id: SubscriptionId) -> bool {
    let before = list.len();
    list.retain(|sub| {
        if sub.id == id {
            sub.active.set(false);
            false
        } else {
            true
        }
    });
    list.len() != before
}

impl<C: 'static, E: 'static> ErasedTable for HandlerTable<C, E> {
    fn remove(&mut self, id: SubscriptionId) -> bool {
        let mut removed = strip(&mut self.global, id);
        for list in self.by_component.values_mut() {
            removed |= strip(list, id);
        }
        removed
    }

    fn len(&self) -> usize {
        self.global.len() + self.by_component.values().map(Vec::len).sum::<usize>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Handler registry, generic over the context handed to handlers.
pub struct EventBus<C: 'static> {
    tables: HashMap<TypeId, Box<dyn ErasedTable>>,
    /// Subscription -> event type, for unsubscription.
    index: HashMap<SubscriptionId, TypeId>,
    next_id: u64,
    /// Handler tables are type-erased; this ties the bus to its context type.
    _context: PhantomData<fn(&mut C)>,
}

impl<C: 'static> EventBus<C> {
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
            index: HashMap::new(),
            next_id: 0,
            _context: PhantomData,
        }
    }

    fn table<E: EntityEvent>(&self) -> Option<&HandlerTable<C, E>> {
        self.tables
            .get(&TypeId::of::<E>())
            .and_then(|table| table.as_any().downcast_ref::<HandlerTable<C, E>>())
    }

    fn table_mut<E: EntityEvent>(&mut self) -> &mut HandlerTable<C, E> {
        self.tables
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(HandlerTable::<C, E>::new()))
            .as_any_mut()
            .downcast_mut::<HandlerTable<C, E>>()
            .expect("handler table is keyed by its own event type")
    }

    fn make_subscription<E: EntityEvent>(
        &mut self,
        order: Option<i32>,
        handler: Box<HandlerFn<C, E>>,
    ) -> Rc<Subscription<C, E>> {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.index.insert(id, TypeId::of::<E>());
        Rc::new(Subscription {
            id,
            order: order.unwrap_or(0),
            active: Cell::new(true),
            handler,
        })
    }

    /// Subscribe `handler` to `E` raised on entities carrying `component`.
    pub fn subscribe<E: EntityEvent>(
        &mut self,
        component: ComponentTypeId,
        order: Option<i32>,
        handler: impl Fn(&mut C, EntityId, &mut E) -> anyhow::Result<()> + 'static,
    ) -> SubscriptionId {
        let sub = self.make_subscription::<E>(order, Box::new(handler));
        let id = sub.id;
        self.table_mut::<E>()
            .by_component
            .entry(component)
            .or_default()
            .push(sub);
        tracing::trace!(?id, ?component, event = std::any::type_name::<E>(), "subscribed");
        id
    }

    /// Subscribe `handler` to every `E`, whatever the entity carries.
    pub fn subscribe_global<E: EntityEvent>(
        &mut self,
        order: Option<i32>,
        handler: impl Fn(&mut C, EntityId, &mut E) -> anyhow::Result<()> + 'static,
    ) -> SubscriptionId {
        let sub = self.make_subscription::<E>(order, Box::new(handler));
        let id = sub.id;
        self.table_mut::<E>().global.push(sub);
        tracing::trace!(?id, event = std::any::type_name::<E>(), "subscribed globally");
        id
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let Some(event_type) = self.index.remove(&id) else {
            return false;
        };
        self.tables
            .get_mut(&event_type)
            .map(|table| table.remove(id))
            .unwrap_or(false)
    }

    /// Handlers for `E` on an entity carrying `components`, plus global ones.
    pub fn local_handlers<E: EntityEvent>(
        &self,
        components: &[ComponentTypeId],
    ) -> HandlerList<C, E> {
        let Some(table) = self.table::<E>() else {
            return Vec::new();
        };
        let mut selected: HandlerList<C, E> = components
            .iter()
            .filter_map(|component| table.by_component.get(component))
            .flatten()
            .chain(table.global.iter())
            .cloned()
            .collect();
        selected.sort_by_key(|sub| sub.sort_key());
        selected
    }

    /// Handlers for `E` subscribed to exactly `component`.
    pub fn directed_handlers<E: EntityEvent>(
        &self,
        component: ComponentTypeId,
    ) -> HandlerList<C, E> {
        let mut selected: HandlerList<C, E> = self
            .table::<E>()
            .and_then(|table| table.by_component.get(&component))
            .cloned()
            .unwrap_or_default();
        selected.sort_by_key(|sub| sub.sort_key());
        selected
    }

    /// Global handlers for `E` only.
    pub fn global_handlers<E: EntityEvent>(&self) -> HandlerList<C, E> {
        let mut selected: HandlerList<C, E> = self
            .table::<E>()
            .map(|table| table.global.clone())
            .unwrap_or_default();
        selected.sort_by_key(|sub| sub.sort_key());
        selected
    }

    /// Total live subscriptions across all event types.
    pub fn subscription_count(&self) -> usize {
        self.tables.values().map(|table| table.len()).sum()
    }
}

impl<C: 'static> Default for EventBus<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: 'static> fmt::Debug for EventBus<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("event_types", &self.tables.len())
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

/// Run `handlers` in order against `event`.
///
/// Stops at the first failing handler and returns its error.
pub fn dispatch<C: 'static, E: EntityEvent>(
    context: &mut C,
    entity: EntityId,
    event: &mut E,
    handlers: &[Rc<Subscription<C, E>>],
) -> anyhow::Result<()> {
    for sub in handlers {
        if event.is_handled() {
            tracing::trace!(%entity, event = std::any::type_name::<E>(), "event handled, stopping");
            break;
        }
        if !sub.is_active() {
            continue;
        }
        (sub.handler)(context, entity, event)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Lifecycle events
// ---------------------------------------------------------------------------

/// Directed at the component type just attached.
#[derive(Debug, Clone, Copy)]
pub struct ComponentAdded {
    pub component: ComponentTypeId,
}

/// Directed at a component after its initialize hook ran.
#[derive(Debug, Clone, Copy)]
pub struct ComponentInit {
    pub component: ComponentTypeId,
}

/// Directed at a component after its startup hook ran.
#[derive(Debug, Clone, Copy)]
pub struct ComponentStartup {
    pub component: ComponentTypeId,
}

/// Directed at a started component that is being torn down.
#[derive(Debug, Clone, Copy)]
pub struct ComponentShutdown {
    pub component: ComponentTypeId,
}

/// Directed at a component right before it is detached.
#[derive(Debug, Clone, Copy)]
pub struct ComponentRemove {
    pub component: ComponentTypeId,
}

/// Raised on an entity as its deletion begins, while all components remain.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntityTerminating;

/// Raised on an entity once it is live in an initialized map.
#[derive(Debug, Clone, Copy, Default)]
pub struct MapInit;

/// Raised to global handlers after an entity has been removed.
#[derive(Debug, Clone, Default)]
pub struct EntityDeleted {
    pub prototype: Option<PrototypeId>,
}

/// Raised on a freshly cloned entity.
#[derive(Debug, Clone, Copy)]
pub struct EntityCloned {
    pub source: EntityId,
}

impl EntityEvent for ComponentAdded {}
impl EntityEvent for ComponentInit {}
impl EntityEvent for ComponentStartup {}
impl EntityEvent for ComponentShutdown {}
impl EntityEvent for ComponentRemove {}
impl EntityEvent for EntityTerminating {}
impl EntityEvent for MapInit {}
impl EntityEvent for EntityDeleted {}
impl EntityEvent for EntityCloned {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
