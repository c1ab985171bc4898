/*!
# Traffic DevKit - test doubles and fixtures

- Mock MQTT client recording publishes, with connection and failure injection
- Command payload builders for the device command topic
- Temporary workspace and fixed-clock helpers
*/

pub mod mqtt_stub;
pub mod test_utils;

pub use mqtt_stub::{MockMessage, MockMqttClient, TrafficMessageBuilder};
pub use test_utils::{weekday_at, weekend_at, TestHarness, TestWorkspace};
