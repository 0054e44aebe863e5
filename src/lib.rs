//! `user-onboarding` hands user signups over to a RabbitMq queue and persists them from a
//! worker, built on top of [`lapin`].
//!
//! The moving parts:
//!
//! - [`ConnectionManager`](crate::connection::ConnectionManager) owns the connection/channel
//!   pair shared by everything else in the process and transparently reopens it;
//! - [`declare_topology`](crate::topology::declare_topology) declares the work queue and its
//!   dead-letter queue;
//! - [`Publisher`](crate::publishers::Publisher) sends persistent JSON messages, retrying once
//!   on a stale channel;
//! - [`Consumer`](crate::consumers::Consumer) feeds deliveries to a
//!   [`Handler`](crate::consumers::Handler), acking successes and dead-lettering failures;
//! - [`connect_with_retry`](crate::startup::connect_with_retry) survives a broker that is
//!   still booting.
//!
//! [`onboarding`] wires them together for the user onboarding flow.
//!
//! ## Examples
//!
//! Check the `demos` directory to see the library in action against a local broker.

pub mod amqp;
pub mod connection;
pub mod consumers;
pub mod onboarding;
pub mod publishers;
pub mod retry;
pub mod startup;
pub mod topology;

#[cfg(test)]
pub(crate) mod testing;
