//! EZO circuit protocol: frames, typed responses, queued commands and
//! the per-circuit driver state machine.

mod command;
mod compensation;
mod frame;
mod response;
mod sensor;

pub use command::{
    Command, CompletionBehavior, CompletionCallback, PreSendHook, Priority, ProcessingHook,
    ResponseSimulator,
};
pub use compensation::{DEFAULT_TEMPERATURE_C, TemperatureCompensatedSensor, TemperatureCompensation};
pub use frame::{FRAME_SIZE, Frame, MAX_TEXT_LEN, Status, decode_frame, encode_frame, success_frame};
pub use response::{
    DeviceInfo, DeviceStatus, EXPORT_STRING_LEN, ExportProgress, ExportString, FirmwareVersion,
    ImportProgress, MemoryValue, OutputParameters, Response, ResponseBody, RestartReason, Slope,
    TemperatureScale, strip_prefix,
};
pub use sensor::{AtlasSensor, Baud, MAX_DEVICE_NAME_LEN, SensorModel, parse_reading};
