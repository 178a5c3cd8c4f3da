use std::env;
use std::fmt::{self, Debug, Display};

#[derive(Clone, Debug, PartialEq)]
pub struct Error {
    pub code: i32,
    pub message: String,
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for Error {}

impl From<env::VarError> for Error {
    fn from(err: env::VarError) -> Self {
        env_var_error(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        reqwest_error(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        serialization_error(err)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        channel_error(err)
    }
}

impl Error {
    /// Errors with a code of 100 or above are meant to be shown to the driver.
    pub fn is_user_visible(&self) -> bool {
        self.code >= 100
    }

    pub fn is_invalid_state_error(&self) -> bool {
        self.code == 100
    }

    pub fn is_invalid_input_error(&self) -> bool {
        self.code == 101
    }

    pub fn is_geofence_violation(&self) -> bool {
        self.code == 102
    }

    pub fn is_confirmation_rejected(&self) -> bool {
        self.code == 103
    }

    pub fn is_invalid_otp(&self) -> bool {
        self.code == 104
    }

    pub fn is_in_flight_error(&self) -> bool {
        self.code == 105
    }

    pub fn is_channel_error(&self) -> bool {
        self.code == 6
    }
}

pub fn invalid_state_error() -> Error {
    Error {
        code: 100,
        message: "invalid state".into(),
    }
}

pub fn invalid_input_error() -> Error {
    Error {
        code: 101,
        message: "invalid input".into(),
    }
}

pub fn geofence_violation_error(distance_meters: f64, radius_meters: f64) -> Error {
    Error {
        code: 102,
        message: format!(
            "you are {:.0} m from the pickup point, move within {:.0} m to mark arrival",
            distance_meters, radius_meters
        ),
    }
}

pub fn confirmation_rejected_error(status: u16, detail: Option<String>) -> Error {
    let message = match detail {
        Some(detail) => format!("request rejected ({}): {}", status, detail),
        None => format!("request rejected ({})", status),
    };

    Error { code: 103, message }
}

pub fn invalid_otp_error() -> Error {
    Error {
        code: 104,
        message: "invalid code".into(),
    }
}

pub fn in_flight_error() -> Error {
    Error {
        code: 105,
        message: "a confirmation is already in progress".into(),
    }
}

pub fn no_ride_error() -> Error {
    Error {
        code: 106,
        message: "no ride".into(),
    }
}

pub fn env_var_error(_: env::VarError) -> Error {
    Error {
        code: 1,
        message: "environment variable error".into(),
    }
}

pub fn config_error(name: &str) -> Error {
    Error {
        code: 1,
        message: format!("invalid value for {}", name),
    }
}

pub fn serialization_error<T: Debug>(err: T) -> Error {
    tracing::debug!("serialization failed: {:?}", err);

    Error {
        code: 2,
        message: "serialization error".into(),
    }
}

pub fn reqwest_error(err: reqwest::Error) -> Error {
    tracing::debug!("request failed: {:?}", err);

    Error {
        code: 3,
        message: "network error".into(),
    }
}

pub fn upstream_error() -> Error {
    Error {
        code: 4,
        message: "upstream error".into(),
    }
}

pub fn unexpected_error() -> Error {
    Error {
        code: 5,
        message: "unexpected error".into(),
    }
}

pub fn channel_error<T: Debug>(err: T) -> Error {
    tracing::debug!("realtime channel failed: {:?}", err);

    Error {
        code: 6,
        message: "realtime channel unavailable".into(),
    }
}

#[test]
fn user_visible_codes() {
    assert!(geofence_violation_error(150.0, 100.0).is_user_visible());
    assert!(invalid_otp_error().is_user_visible());
    assert!(!upstream_error().is_user_visible());
    assert!(!channel_error("closed").is_user_visible());
}

#[test]
fn geofence_message_carries_distance_and_radius() {
    let err = geofence_violation_error(201.4, 100.0);

    assert!(err.is_geofence_violation());
    assert!(err.message.contains("201 m"));
    assert!(err.message.contains("100 m"));
}

#[test]
fn rejected_message_includes_detail() {
    let err = confirmation_rejected_error(400, Some("Ride not assigned to you".into()));

    assert!(err.is_confirmation_rejected());
    assert_eq!(err.message, "request rejected (400): Ride not assigned to you");
}
