mod bus;
pub mod file_sensor;
mod rules;
pub mod sensor;
pub mod system_sensor;

pub use bus::{EventBus, PERCEPTION_CATEGORY, ReflexDispatch};
pub use file_sensor::{FileSensor, FileTracker};
pub use rules::{baseline_rules, merge_rules};
pub use sensor::{Sensor, SensorError, SensorManager};
pub use system_sensor::SystemSensor;
