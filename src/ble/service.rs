use heapless::Vec;
use trouble_host::prelude::gatt_service;

use super::state::MAX_COMMAND_LEN;
use crate::gatt::SENSOR_DATA_SERVICE_UUID;
use crate::protocol::frame::MAX_FRAME_LEN;

#[gatt_service(uuid = SENSOR_DATA_SERVICE_UUID)]
pub struct SensorDataService {
    /// Commands from the client
    #[characteristic(uuid = "34800001-7185-4d5d-b431-630e7050e8f0", write)]
    pub command: Vec<u8, MAX_COMMAND_LEN>,

    /// Framed responses and sensor data
    #[characteristic(uuid = "34800002-7185-4d5d-b431-630e7050e8f0", notify)]
    pub data: Vec<u8, MAX_FRAME_LEN>,
}
