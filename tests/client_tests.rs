// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for depth client reference counting

use xr_depth::{ClientRefCounter, DepthClientToken, DepthError, DepthResult, SensorStreamControl};

#[derive(Default)]
struct Sensor {
    requests: Vec<&'static str>,
    fail_next: bool,
}

impl SensorStreamControl for Sensor {
    fn pause(&mut self) -> DepthResult<()> {
        self.requests.push("pause");
        Ok(())
    }

    fn resume(&mut self) -> DepthResult<()> {
        if std::mem::take(&mut self.fail_next) {
            return Err(DepthError::Unsupported("resume rejected".to_string()));
        }
        self.requests.push("resume");
        Ok(())
    }
}

fn probed(active: bool) -> ClientRefCounter<Sensor> {
    let mut counter = ClientRefCounter::new(Sensor::default());
    counter.set_sensor_state(active);
    counter
}

#[test]
fn test_one_resume_then_one_pause() {
    let mut counter = probed(false);
    let a = DepthClientToken::new();
    let b = DepthClientToken::new();

    counter.add_client(a).unwrap();
    counter.add_client(b).unwrap();
    counter.remove_client(&a).unwrap();
    counter.remove_client(&b).unwrap();

    assert_eq!(counter.control().requests, vec!["resume", "pause"]);
    assert_eq!(counter.sensor_active(), Some(false));
}

#[test]
fn test_adding_same_token_twice_is_idempotent() {
    let mut counter = probed(false);
    let token = DepthClientToken::new();

    assert!(counter.add_client(token).unwrap());
    assert!(!counter.add_client(token).unwrap());
    assert_eq!(counter.client_count(), 1);
    assert_eq!(counter.control().requests, vec!["resume"]);

    assert!(counter.remove_client(&token).unwrap());
    assert!(!counter.remove_client(&token).unwrap());
    assert_eq!(counter.control().requests, vec!["resume", "pause"]);
}

#[test]
fn test_already_active_sensor_is_not_resumed() {
    let mut counter = probed(true);
    counter.add_client(DepthClientToken::new()).unwrap();
    assert!(counter.control().requests.is_empty());
}

#[test]
fn test_mutations_before_probe_issue_nothing() {
    let mut counter = ClientRefCounter::new(Sensor::default());
    let token = DepthClientToken::new();
    counter.add_client(token).unwrap();
    assert!(counter.contains(&token));
    assert!(counter.control().requests.is_empty());
    assert_eq!(counter.sensor_active(), None);
}

#[test]
fn test_failed_resume_is_retried_on_next_change() {
    let mut counter = ClientRefCounter::new(Sensor {
        fail_next: true,
        ..Sensor::default()
    });
    counter.set_sensor_state(false);

    let first = DepthClientToken::new();
    assert!(counter.add_client(first).is_err());
    assert!(counter.contains(&first));
    assert_eq!(counter.sensor_active(), Some(false));

    counter.add_client(DepthClientToken::new()).unwrap();
    assert_eq!(counter.control().requests, vec!["resume"]);
    assert_eq!(counter.sensor_active(), Some(true));
}
