use mch_ipmi::commands::{
    ChassisControlCommand, Command, GetChannelAuthCapabilities, GetChassisStatus, GetDeviceId,
    GetFanLevel, GetPowerLevel, GetSdrRepositoryInfo, GetSensorReading, PowerType, ReadFruData,
    SetFanLevel,
};
use mch_ipmi::{ChassisControl, Error, PrivilegeLevel, RawResponse};

fn ok(data: &[u8]) -> RawResponse {
    RawResponse {
        completion_code: 0x00,
        data: data.to_vec(),
    }
}

#[test]
fn get_device_id_parses_response() {
    let response = ok(&[
        0x20, 0x01, 0x02, 0x43, 0x51, 0x00, 0x32, 0x5D, 0x00, 0x01, 0x00, 0x06, 0x2B, 0x2B, 0x00,
    ]);

    let parsed = GetDeviceId.parse_response(response).expect("parse");
    assert_eq!(parsed.device_id, 0x20);
    assert_eq!(parsed.device_revision, 0x01);
    assert_eq!(parsed.firmware_major, 0x02);
    assert_eq!(parsed.firmware_minor, 0x43);
    assert_eq!(parsed.ipmi_version, 0x51);
    assert_eq!(parsed.manufacturer_id, 0x00_5D32);
    assert_eq!(parsed.product_id, 0x0001);
}

#[test]
fn completion_code_is_reported() {
    let response = RawResponse {
        completion_code: 0xC1,
        data: vec![0xAA, 0xBB],
    };

    let err = GetSensorReading { sensor_number: 4 }
        .parse_response(response)
        .expect_err("expected error");
    assert!(matches!(
        err,
        Error::CompletionCode {
            completion_code: 0xC1
        }
    ));
    assert_eq!(err.completion_code(), Some(0xC1));
}

#[test]
fn get_chassis_status_parses_response() {
    let status = GetChassisStatus
        .parse_response(ok(&[0x5F, 0x19, 0x0F, 0xFF]))
        .expect("parse");
    assert!(status.system_power_on);
    assert!(status.power_overload);
    assert!(status.last_power_event.ac_failed);
    assert!(status.cooling_fan_fault);
}

#[test]
fn chassis_control_encodes_request_data() {
    let cmd = ChassisControlCommand {
        control: ChassisControl::PowerUp,
    };
    assert_eq!(cmd.request_data(), vec![0x01]);
    let cmd = ChassisControlCommand {
        control: ChassisControl::HardReset,
    };
    assert_eq!(cmd.request_data(), vec![0x03]);
}

#[test]
fn get_channel_auth_capabilities_encodes_request_data() {
    let cmd = GetChannelAuthCapabilities::new(0x0E, PrivilegeLevel::Administrator);
    assert_eq!(cmd.request_data(), vec![0x0E, 0x04]);
}

#[test]
fn repository_info_carries_timestamps() {
    let info = GetSdrRepositoryInfo
        .parse_response(ok(&[
            0x51, 0x2A, 0x00, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x65, 0x10, 0x00, 0x00, 0x65, 0x00,
        ]))
        .expect("parse");
    assert_eq!(info.record_count, 42);
    assert_eq!(info.addition_timestamp, 0x6500_0000);
    assert_eq!(info.erase_timestamp, 0x6500_0010);
}

#[test]
fn sensor_reading_flags_are_decoded() {
    let reading = GetSensorReading { sensor_number: 7 }
        .parse_response(ok(&[0x37, 0xE0, 0x09]))
        .expect("parse");
    assert_eq!(reading.raw, 0x37);
    assert!(reading.scanning_enabled);
    assert!(reading.unavailable);
    assert_eq!(reading.threshold_state, 0x09);
}

#[test]
fn picmg_commands_carry_the_identifier() {
    let cmd = SetFanLevel {
        fru_id: 40,
        level: 7,
    };
    assert_eq!(cmd.request_data(), vec![0x00, 40, 7]);

    let level = GetFanLevel { fru_id: 40 }
        .parse_response(ok(&[0x00, 0xFF, 0x06, 0x01]))
        .expect("parse");
    assert_eq!(level.override_level, 0xFF);
    assert_eq!(level.local_level, Some(6));
    assert_eq!(level.local_control_enabled, Some(true));

    let err = GetFanLevel { fru_id: 40 }
        .parse_response(ok(&[0x01, 0x05]))
        .expect_err("wrong identifier");
    assert!(matches!(err, Error::Decode(_)));
}

#[test]
fn power_level_lists_levels() {
    let cmd = GetPowerLevel {
        fru_id: 5,
        power_type: PowerType::SteadyState,
    };
    assert_eq!(cmd.request_data(), vec![0x00, 5, 0x00]);
    let level = cmd
        .parse_response(ok(&[0x00, 0x81, 0x00, 0x0A, 0x02, 0x04]))
        .expect("parse");
    assert!(level.dynamic);
    assert_eq!(level.level, 1);
    assert_eq!(level.multiplier, 0x0A);
    assert_eq!(level.levels, vec![0x02, 0x04]);
}

#[test]
fn fru_data_read_is_truncated_to_count() {
    let cmd = ReadFruData {
        fru_id: 3,
        offset: 0x0110,
        count: 16,
    };
    assert_eq!(cmd.request_data(), vec![3, 0x10, 0x01, 16]);
    let data = cmd.parse_response(ok(&[2, 0xAA, 0xBB, 0xCC])).expect("parse");
    assert_eq!(data, vec![0xAA, 0xBB]);
}
