//! CSV output of a full acquisition against the simulated device.
#![cfg(feature = "storage_csv")]

use resistes_daq::data::{CsvOptions, CsvWriter};
use resistes_daq::hardware::mock::MockResistivimeter;
use resistes_daq::hardware::AcquisitionParams;
use resistes_daq::session::{stop_pair, AcquisitionSession, SessionOptions, SessionState};
use resistes_daq::trigger::NeverTrigger;

#[tokio::test(start_paused = true)]
async fn acquisition_writes_header_and_one_line_per_record() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("acquisition.csv");
    let options = CsvOptions {
        datetime: true,
        ..Default::default()
    };
    let mut writer = CsvWriter::create(Some(&path), &options, 2).unwrap();

    let device = MockResistivimeter::default().spawn();
    let params = AcquisitionParams {
        channels_nb: 2,
        integration_nb: 4,
        ..Default::default()
    };
    let mut session = AcquisitionSession::new(
        Box::new(device),
        params,
        SessionOptions::default().with_max_records(5),
    );
    let (_stop, mut signal) = stop_pair();
    let summary = session
        .run(&mut writer, &mut NeverTrigger, &mut signal)
        .await
        .unwrap();
    assert_eq!(summary.state, SessionState::Stopped);
    assert_eq!(writer.rows(), 5);

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 6);
    assert_eq!(
        lines[0],
        "date;count;rec. batt. voltage(V);em. batt. voltage(V);phase current(mA);quad. current(mA);\
         phase potential(mV) (ch0);quad. potential(mV) (ch0);\
         phase resistivity(kOhm.m) (ch0);quad. resistivity(kOhm.m) (ch0);\
         phase potential(mV) (ch1);quad. potential(mV) (ch1);\
         phase resistivity(kOhm.m) (ch1);quad. resistivity(kOhm.m) (ch1)"
    );
    for (i, line) in lines[1..].iter().enumerate() {
        let fields: Vec<&str> = line.split(';').collect();
        assert_eq!(fields.len(), 14);
        assert_eq!(fields[1], i.to_string());
        // 11191 / 16383 * 18.3 V
        assert_eq!(fields[2], "12.5");
        assert!(fields[6].parse::<f64>().is_ok());
    }
}

#[tokio::test]
async fn missing_directory_is_created() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("deeper").join("out.csv");
    CsvWriter::create(Some(&path), &CsvOptions::default(), 1).unwrap();
    let header = std::fs::read_to_string(&path).unwrap();
    assert!(header.starts_with("count;"));
}
