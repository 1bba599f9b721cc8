// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod event_bus;
pub mod graph_loader;
pub mod message_bus;
pub mod stream_generators;
pub mod turtle;
pub mod websub;

pub use event_bus::{EventBus, EventBusError, EventReceiver};
pub use message_bus::{BusError, BusHandler, BusMessage, BusReply, Handled, MessageBus, ServiceAddress};
