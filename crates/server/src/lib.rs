//! The two serving faces of the Hyperion master.
//!
//! The [`ui::UiService`] answers queries from interactive clients and fans
//! cluster events out to all of them; the [`slave::SlaveService`] talks to
//! the slave agent on each remote host. Both are driven by a
//! [`hyperion_net::Reactor`]; the master-side operations on slaves go
//! through the [`slave::SlaveHandle`].

pub use control::{ControlCenter, ControlError};
pub use error::Error;
pub use launch::{LogSink, RemoteLauncher};
pub use slave::{SlaveHandle, SlaveService};
pub use ui::UiService;

pub mod control;
pub mod dispatch;
mod error;
pub mod launch;
pub mod slave;
pub mod ui;
