//! # Events
//!
//! Two layers share this module:
//!
//! - **Bus**: topic-based publish/subscribe with synchronous fan-out
//! - **Commands**: request/response correlation built on a dedicated bus
//!
//! ## Event Flow
//!
//! ```text
//! ┌──────────┐  emit(topic, e)  ┌──────────┐  handler(&e)  ┌──────────┐
//! │Publisher │─────────────────▶│   Bus    │──────────────▶│Subscriber│
//! └──────────┘                  └──────────┘               └──────────┘
//! ```
//!
//! Handlers run on the emitting thread in registration order. The bus keeps
//! no history: a subscriber only sees emissions made while it is registered.
//!
//! ## Request-Response Pattern
//!
//! ```text
//! ┌─────────┐  "login" {seq, p}  ┌──────────┐        ┌─────┐
//! │ Caller  │───────────────────▶│CommandBus│───────▶│Actor│
//! └────┬────┘                    └──────────┘        └──┬──┘
//!      │          "login:response" {seq, r}             │
//!      └────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage Examples
//!
//! ### Subscribing and emitting
//!
//! ```rust
//! # use switchboard::event::bus::Bus;
//! let bus: Bus<String, u32> = Bus::new();
//! let id = bus.on("tick", |n: &u32| println!("tick {n}"));
//! bus.emit("tick", &1);
//! bus.off(id);
//! ```
//!
//! ### Running a command
//!
//! ```rust,no_run
//! # use switchboard::{event::command::Commands, Registry};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let commands = Commands::new(&Registry::new())?;
//! commands.add_command("add", |(a, b): (i64, i64)| async move { a + b })?;
//!
//! let response = commands.run_command::<_, i64>("add", (1, 2)).await?;
//! assert_eq!(response.payload, 3);
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod command;

pub use bus::{Bus, SubscriberId, DEFAULT_BUS_NAME};
pub use command::{CommandError, CommandResult, Commands, Envelope, HandlerType};
