//! Transition rules for a single order record.
//!
//! Pure functions: given the current record and one event, decide whether
//! the event applies, is a duplicate, must wait for a missing predecessor,
//! or contradicts what the record already knows. Locking, publication and
//! deferral bookkeeping live in the store.

use std::collections::HashSet;
use xgw_core::{
    weighted_average, OrderRecord, OrderStatus, Price, Quantity, RejectInfo, VenueEvent,
};

/// How strictly predecessor ordering is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Live event path: events with a missing predecessor are deferred.
    Normal,
    /// Expired deferrals and reconciliation sweeps: fast-forward through
    /// missing acknowledgements instead of waiting.
    Conclusive,
}

/// Result of evaluating one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Record mutated.
    Applied,
    /// Already reflected in the record.
    NoOp,
    /// Predecessor missing; hold the event and retry later.
    Defer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    Protocol(String),
    InvalidFill(String),
}

type StepResult = Result<Step, Violation>;

/// Evaluate `event` against `record`, mutating it when the event applies.
///
/// `trade_ids` holds trade ids already applied to this order. The caller is
/// responsible for stamping (`OrderRecord::touch`) after `Step::Applied`.
pub fn apply(
    record: &mut OrderRecord,
    trade_ids: &mut HashSet<String>,
    event: &VenueEvent,
    mode: Mode,
) -> StepResult {
    match event {
        VenueEvent::BrokerAck {
            broker_order_id, ..
        } => broker_ack(record, broker_order_id),
        VenueEvent::BrokerReject { error, .. } => broker_reject(record, error, mode),
        VenueEvent::VenueAck { venue_order_id, .. } => venue_ack(record, venue_order_id, mode),
        VenueEvent::VenueReject { error, .. } => venue_reject(record, error, mode),
        VenueEvent::Fill {
            qty,
            price,
            trade_id,
            ..
        } => fill(record, trade_ids, *qty, *price, trade_id.as_deref()),
        VenueEvent::CancelAck { canceled_qty, .. } => cancel_ack(record, *canceled_qty, mode),
        VenueEvent::CancelReject { error, .. } => cancel_reject(record, error),
    }
}

/// Record an id the first time it is learned. Returns whether it changed.
fn learn_id(slot: &mut Option<String>, id: &str) -> bool {
    if slot.is_none() && !id.is_empty() {
        *slot = Some(id.to_string());
        true
    } else {
        false
    }
}

fn broker_ack(record: &mut OrderRecord, broker_order_id: &str) -> StepResult {
    match record.status {
        OrderStatus::Created | OrderStatus::Submitted => {
            learn_id(&mut record.broker_order_id, broker_order_id);
            record.status = OrderStatus::BrokerAcked;
            Ok(Step::Applied)
        }
        OrderStatus::BrokerRejected | OrderStatus::VenueRejected => Ok(Step::NoOp),
        // Already at or past BrokerAcked (fast-forwarded by a fill or venue ack).
        _ => {
            if learn_id(&mut record.broker_order_id, broker_order_id) {
                Ok(Step::Applied)
            } else {
                Ok(Step::NoOp)
            }
        }
    }
}

fn broker_reject(record: &mut OrderRecord, error: &RejectInfo, mode: Mode) -> StepResult {
    match record.status {
        OrderStatus::BrokerRejected => Ok(Step::NoOp),
        OrderStatus::Created | OrderStatus::Submitted => {
            reject(record, OrderStatus::BrokerRejected, error);
            Ok(Step::Applied)
        }
        // The server's full-state answer outranks a locally guessed ack.
        OrderStatus::BrokerAcked | OrderStatus::VenueAcked
            if mode == Mode::Conclusive && record.filled_qty.is_zero() =>
        {
            reject(record, OrderStatus::BrokerRejected, error);
            Ok(Step::Applied)
        }
        other => Err(Violation::Protocol(format!(
            "broker reject {error} while {other}"
        ))),
    }
}

fn venue_ack(record: &mut OrderRecord, venue_order_id: &str, mode: Mode) -> StepResult {
    match record.status {
        OrderStatus::Created | OrderStatus::Submitted => match mode {
            Mode::Normal => Ok(Step::Defer),
            Mode::Conclusive => {
                learn_id(&mut record.venue_order_id, venue_order_id);
                record.status = OrderStatus::VenueAcked;
                Ok(Step::Applied)
            }
        },
        OrderStatus::BrokerAcked => {
            learn_id(&mut record.venue_order_id, venue_order_id);
            record.status = OrderStatus::VenueAcked;
            Ok(Step::Applied)
        }
        OrderStatus::BrokerRejected | OrderStatus::VenueRejected => Ok(Step::NoOp),
        _ => {
            if learn_id(&mut record.venue_order_id, venue_order_id) {
                Ok(Step::Applied)
            } else {
                Ok(Step::NoOp)
            }
        }
    }
}

fn venue_reject(record: &mut OrderRecord, error: &RejectInfo, mode: Mode) -> StepResult {
    match record.status {
        OrderStatus::VenueRejected => Ok(Step::NoOp),
        OrderStatus::Created | OrderStatus::Submitted => match mode {
            Mode::Normal => Ok(Step::Defer),
            Mode::Conclusive => {
                reject(record, OrderStatus::VenueRejected, error);
                Ok(Step::Applied)
            }
        },
        OrderStatus::BrokerAcked | OrderStatus::VenueAcked if record.filled_qty.is_zero() => {
            reject(record, OrderStatus::VenueRejected, error);
            Ok(Step::Applied)
        }
        other => Err(Violation::Protocol(format!(
            "venue reject {error} while {other} with filled {}",
            record.filled_qty
        ))),
    }
}

fn reject(record: &mut OrderRecord, status: OrderStatus, error: &RejectInfo) {
    record.status = status;
    record.cancel_pending = false;
    record.set_error(error);
}

fn fill(
    record: &mut OrderRecord,
    trade_ids: &mut HashSet<String>,
    qty: Quantity,
    price: Price,
    trade_id: Option<&str>,
) -> StepResult {
    if !qty.is_positive() {
        return Err(Violation::InvalidFill(format!("non-positive qty {qty}")));
    }
    if let Some(id) = trade_id {
        if trade_ids.contains(id) {
            return Ok(Step::NoOp);
        }
    }
    if record.status.is_rejected() {
        return Err(Violation::Protocol(format!(
            "fill {qty}@{price} on {} order",
            record.status
        )));
    }
    if record.filled_qty + record.canceled_qty + qty > record.requested_qty {
        return Err(Violation::InvalidFill(format!(
            "fill {qty} exceeds remainder (requested {}, filled {}, canceled {})",
            record.requested_qty, record.filled_qty, record.canceled_qty
        )));
    }

    record.avg_fill_price = weighted_average(record.filled_qty, record.avg_fill_price, qty, price);
    record.filled_qty += qty;
    record.last_fill_qty = qty;
    record.last_fill_price = price;
    if let Some(id) = trade_id {
        trade_ids.insert(id.to_string());
    }

    record.status = match record.status {
        // A fill that crossed the cancel on the wire; stays terminal.
        OrderStatus::Canceled | OrderStatus::PartiallyCanceled => OrderStatus::PartiallyCanceled,
        _ if record.filled_qty >= record.requested_qty => {
            record.cancel_pending = false;
            OrderStatus::Filled
        }
        _ => OrderStatus::PartiallyFilled,
    };
    Ok(Step::Applied)
}

fn cancel_ack(record: &mut OrderRecord, canceled_qty: Quantity, mode: Mode) -> StepResult {
    match record.status {
        OrderStatus::Canceled | OrderStatus::PartiallyCanceled => return Ok(Step::NoOp),
        // Lost the race against the last fill, or the order never lived.
        OrderStatus::Filled | OrderStatus::BrokerRejected | OrderStatus::VenueRejected => {
            return Ok(Step::NoOp)
        }
        OrderStatus::Created | OrderStatus::Submitted | OrderStatus::BrokerAcked => {
            if mode == Mode::Normal {
                return Ok(Step::Defer);
            }
        }
        OrderStatus::VenueAcked | OrderStatus::PartiallyFilled => {
            if mode == Mode::Normal && record.filled_qty + canceled_qty < record.requested_qty {
                return Ok(Step::Defer);
            }
        }
    }

    let remainder = record.requested_qty.saturating_sub(record.filled_qty);
    record.canceled_qty = canceled_qty.min(remainder);
    record.cancel_pending = false;
    record.status = if record.filled_qty.is_zero() {
        OrderStatus::Canceled
    } else {
        OrderStatus::PartiallyCanceled
    };
    Ok(Step::Applied)
}

fn cancel_reject(record: &mut OrderRecord, error: &RejectInfo) -> StepResult {
    if record.is_terminal() {
        return Ok(Step::NoOp);
    }
    record.cancel_pending = false;
    record.set_error(error);
    Ok(Step::Applied)
}
