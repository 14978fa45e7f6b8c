pub mod config;
pub mod control;
pub mod device;
pub mod error;
pub mod router;
pub mod state;
pub mod topics;
pub mod types;
pub mod zone;

pub use config::{Clamp, ClimateConfig, Settings};
pub use control::{ControlConfig, ControlEngine, Decision, Dispatch};
pub use device::{Change, Device, DeviceId, ZoneId};
pub use error::{ConfigError, EnumParseError, RouteError};
pub use router::{clamp_current, parse_change, parse_inbound, Inbound};
pub use state::{ActuatorState, DeviceState, ZoneState};
pub use topics::*;
pub use types::{Action, Command, FanMode, Mode, PowerState, PresetMode, Reading};
pub use zone::{resolve, DirectoryEntry, Fleet, SetTarget, Topology, Zone};
