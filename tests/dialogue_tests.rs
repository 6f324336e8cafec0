use anyhow::Result;

use fleetbot::dialogue::{parse_liters, parse_odometer, validate_driver_name, FlowState, PhotoKind};

/// Integration test for the numeric input validation used by the fuel flow
#[tokio::test]
async fn test_liters_validation() -> Result<()> {
    // Comma and dot are both accepted as the decimal separator
    assert_eq!(parse_liters("24.5").unwrap(), 24.5);
    assert_eq!(parse_liters("24,5").unwrap(), 24.5);

    // Words, units and negative amounts are rejected
    assert!(parse_liters("twenty").is_err());
    assert!(parse_liters("24.5l").is_err());
    assert!(parse_liters("-5").is_err());

    Ok(())
}

/// Test dialogue state serialization round trip
#[tokio::test]
async fn test_flow_state_serialization() -> Result<()> {
    let states = vec![
        FlowState::Idle,
        FlowState::AwaitingPhoto(PhotoKind::Refuel),
        FlowState::AwaitingDeclineReason { full_clear: true },
        FlowState::AwaitingSubtaskReason { slot: 2 },
    ];

    for state in states {
        let encoded = serde_json::to_string(&state)?;
        let decoded: FlowState = serde_json::from_str(&encoded)?;
        assert_eq!(decoded, state);
    }

    Ok(())
}

/// Test basic dialogue defaults
#[tokio::test]
async fn test_dialogue_defaults() -> Result<()> {
    let default_state = FlowState::default();
    assert!(matches!(default_state, FlowState::Start));

    Ok(())
}

/// Unit test for odometer validation
#[test]
fn test_odometer_validation() {
    assert_eq!(parse_odometer("123456").unwrap(), 123456);
    assert!(parse_odometer("12,5").is_err());
    assert!(parse_odometer("").is_err());
}

/// Unit test for driver name trimming
#[test]
fn test_driver_name_trimming() {
    let result = validate_driver_name("  Ivan Petrov  ");
    assert_eq!(result.unwrap(), "Ivan Petrov");
}
