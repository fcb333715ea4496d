pub mod controller;
pub mod cooling;
pub mod device;
pub mod sim;

pub use controller::CaptureController;
pub use cooling::{CoolingCache, CoolingService, CoolingStatus};
pub use device::{
    share_camera, share_mount, Camera, CameraCapabilities, DeviceResult, Mount, SharedCamera,
    SharedMount, TemperatureControl,
};
pub use sim::{SimCooler, SimulatedCamera, SimulatedMount};
