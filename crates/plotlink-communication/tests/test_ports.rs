//! Port enumeration against the real system

use plotlink_communication::{find_port, list_ports};
use plotlink_core::{ConnectionError, DeviceIdentity};

#[test]
fn test_enumeration_reports_usb_ids() {
    match list_ports() {
        Ok(ports) => {
            for port in &ports {
                assert!(!port.port_name.is_empty());
                if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
                    let identity =
                        DeviceIdentity::new(format!("{:04x}", vid), format!("{:04X}", pid));
                    assert!(find_port(&ports, &identity).is_some());
                }
            }
        }
        // Containers without udev cannot enumerate; that must surface as an error value
        Err(e) => assert!(matches!(e, ConnectionError::Enumeration { .. })),
    }
}

#[test]
fn test_unknown_device_is_not_found() {
    if let Ok(ports) = list_ports() {
        let identity = DeviceIdentity::new("zzzz", "0000");
        assert!(find_port(&ports, &identity).is_none());
    }
}
