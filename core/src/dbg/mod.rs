//! Debugger engines.
//!
//! Breakpoints and watches are owned by the simulator and consulted around
//! every step: breakpoints before fetch, watches before and after.

mod bpt;
mod expr;
mod watch;

pub use self::bpt::{BreakpointEngine, Condition, Hit, Kind as BreakKind, Rule};
pub use self::expr::{eval, parse, Error as ExprError, Expr};
pub use self::watch::{Kind as WatchKind, WatchEngine, WatchEvent};
