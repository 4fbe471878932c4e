//! Agent fabric - broker, mailboxes and the guardian/bartender control loops
//!
//! Every agent owns one mailbox and one runtime loop. Agents never call each other
//! directly; they publish messages through the [`Broker`], which appends them to the
//! audit log and routes them:
//! 1. **Broadcast** (`to = all`) - every registered agent except the sender
//! 2. **Direct** (`to = <agent id>`) - exactly that agent
//! 3. **Topic** - subscribers of the event type when `to` names nobody registered
//!
//! # Key Types
//!
//! - `Broker` - registration, publish, history and stats
//! - `MessageHandler` - per-agent dispatch over the closed event vocabulary
//! - `GuardianAgent` - turns drink events into risk assessments and vetoes
//! - `BartenderAgent` - folds vetoes into the next conversational turn
//!
//! # Safety Principle
//!
//! Severity comes only from the deterministic risk engine. A veto is advisory state
//! for the bartender's next turn; nothing ever blocks waiting on one.

pub mod analyzer;
pub mod bartender;
pub mod broker;
pub mod guardian;
pub mod handler;
pub mod mailbox;
pub mod registry;
pub mod runtime;
pub mod veto;

pub use analyzer::{AnalysisError, SessionAnalyzer, SessionSnapshot};
pub use bartender::{BartenderAgent, GuardianWarning, TurnDirective, TurnRequest};
pub use broker::{AgentStats, Broker, BrokerError, BrokerSettings};
pub use guardian::{GuardianAgent, GuardianSettings, MonitoredSession};
pub use handler::{HandlerContext, HandlerError, HandlerOutcome, MessageHandler, Publisher};
pub use veto::VetoPolicy;
