use mv_ddr::ValueTooWide;

use crate::ids::{InterfaceId, LaneId};
use crate::results::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A polled status bit never reached its expected value.
    #[error("timeout polling register {addr:#x} on interface {if_id}")]
    Timeout { if_id: InterfaceId, addr: u32 },
    /// An edge search never latched for at least one bit of the lane.
    #[error("search did not lock on interface {if_id}, lane {lane}")]
    LockFailure { if_id: InterfaceId, lane: LaneId },
    /// The ODPG reported a failed search.
    #[error("search failed on interface {if_id}")]
    SearchFailed { if_id: InterfaceId },
    #[error("valid window of {size} taps too narrow on interface {if_id}, lane {lane}")]
    WindowTooNarrow {
        if_id: InterfaceId,
        lane: LaneId,
        size: u8,
    },
    /// The windows of the bits of a lane are further apart than the skew tolerance.
    #[error("bit windows {spread} taps apart on interface {if_id}, lane {lane}")]
    LaneSkew {
        if_id: InterfaceId,
        lane: LaneId,
        spread: u8,
    },
    /// The calibration eye of a lane is missing or smaller than the minimum area.
    #[error("calibration eye of area {area} too small on interface {if_id}, lane {lane}")]
    EyeTooSmall {
        if_id: InterfaceId,
        lane: LaneId,
        area: u32,
    },
    #[error("bad parameter: {0}")]
    BadParameter(&'static str),
    #[error("unsupported configuration: {0}")]
    Unsupported(&'static str),
    #[error("training stage {0} failed")]
    StageFailed(Stage),
    #[error(transparent)]
    Field(#[from] ValueTooWide),
}

impl Error {
    /// Interface the error was raised for, if it is specific to one.
    pub const fn interface(&self) -> Option<InterfaceId> {
        match self {
            Error::Timeout { if_id, .. }
            | Error::LockFailure { if_id, .. }
            | Error::SearchFailed { if_id }
            | Error::WindowTooNarrow { if_id, .. }
            | Error::LaneSkew { if_id, .. }
            | Error::EyeTooSmall { if_id, .. } => Some(*if_id),
            _ => None,
        }
    }
}
