use std::time::Duration;

use super::{ComResult, ConnectionDescriptor, Connector, SerialPortHandle};

/// Opens real serial ports through the `serialport` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    fn connect(&self, descriptor: &ConnectionDescriptor) -> ComResult<Box<dyn SerialPortHandle>> {
        let port = serialport::new(&descriptor.port, descriptor.baud_rate)
            .parity(descriptor.parity.into())
            .stop_bits(descriptor.stop_bits.into())
            .data_bits(descriptor.data_bits.into())
            .timeout(descriptor.read_timeout())
            .open()?;

        Ok(Box::new(port))
    }
}

impl SerialPortHandle for Box<dyn serialport::SerialPort> {
    fn set_timeout(&mut self, timeout: Duration) -> ComResult<()> {
        serialport::SerialPort::set_timeout(self.as_mut(), timeout)?;
        Ok(())
    }

    fn try_clone_handle(&self) -> ComResult<Box<dyn SerialPortHandle>> {
        let port = serialport::SerialPort::try_clone(self.as_ref())?;
        Ok(Box::new(port))
    }
}
