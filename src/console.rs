use crate::engine::{Command, Snapshot};
use crate::entities::{Coordinates, PositionFix};
use crate::error::{invalid_input_error, Error};

/// A parsed console line.
#[derive(Clone, Debug, PartialEq)]
pub enum Input {
    Command(Command),
    Fix(PositionFix),
}

pub const HELP: &str = "\
online | offline
accept | decline
arrive [lat lng]
otp <code> | start | complete | cancel [reason]
ack | rate <1-5> [comment] | clear
chat <text>
fix <lat> <lng> [speed heading accuracy altitude]
quit";

pub fn parse_line(line: &str) -> Result<Input, Error> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word {
        "online" => Command::GoOnline,
        "offline" => Command::GoOffline,
        "accept" => Command::Accept,
        "decline" => Command::Decline,
        "arrive" => Command::Arrive {
            position: match rest {
                "" => None,
                _ => {
                    let numbers = numbers(rest)?;
                    match numbers.as_slice() {
                        [lat, lng] => Some(Coordinates::new(*lat, *lng)),
                        _ => return Err(invalid_input_error()),
                    }
                }
            },
        },
        "otp" if !rest.is_empty() => Command::VerifyOtp(rest.to_string()),
        "start" => Command::Start,
        "complete" => Command::Complete,
        "cancel" => Command::Cancel {
            reason: non_empty(rest),
        },
        "ack" => Command::Acknowledge,
        "rate" => {
            let (rating, comment) = match rest.split_once(char::is_whitespace) {
                Some((rating, comment)) => (rating, non_empty(comment.trim())),
                None => (rest, None),
            };
            let rating: u8 = rating.parse().map_err(|_| invalid_input_error())?;

            if !(1..=5).contains(&rating) {
                return Err(invalid_input_error());
            }

            Command::RateRider { rating, comment }
        }
        "clear" => Command::ClearError,
        "chat" if !rest.is_empty() => Command::Chat(rest.to_string()),
        "fix" => return parse_fix(rest).map(Input::Fix),
        "quit" | "exit" => Command::Shutdown,
        _ => return Err(invalid_input_error()),
    };

    Ok(Input::Command(command))
}

fn parse_fix(rest: &str) -> Result<PositionFix, Error> {
    let numbers = numbers(rest)?;

    if !(2..=6).contains(&numbers.len()) {
        return Err(invalid_input_error());
    }

    let mut fix = PositionFix::new(numbers[0], numbers[1]);
    fix.speed = numbers.get(2).copied();
    fix.heading = numbers.get(3).copied();
    fix.accuracy = numbers.get(4).copied();
    fix.altitude = numbers.get(5).copied();

    Ok(fix)
}

fn numbers(text: &str) -> Result<Vec<f64>, Error> {
    text.split_whitespace()
        .map(|part| part.parse::<f64>().map_err(|_| invalid_input_error()))
        .collect()
}

fn non_empty(text: &str) -> Option<String> {
    match text {
        "" => None,
        text => Some(text.to_string()),
    }
}

/// One-line rendering of a snapshot for the console.
pub fn render(snapshot: &Snapshot) -> String {
    let mut line = format!(
        "[{}] {}",
        if snapshot.online { "online" } else { "offline" },
        snapshot.state.name()
    );

    if let Some(offer) = &snapshot.offer {
        line.push_str(&format!(
            " | offer {} {} -> {} ${:.2}",
            offer.ride_id, offer.pickup_address, offer.dropoff_address, offer.fare
        ));
    }

    if let Some(remaining) = snapshot.countdown_remaining {
        line.push_str(&format!(" ({}s)", remaining));
    }

    if let Some(ride) = &snapshot.active_ride {
        line.push_str(&format!(" | ride {} ({})", ride.id(), ride.status()));
    }

    if let Some(summary) = &snapshot.summary {
        line.push_str(&format!(" | earned ${:.2}", summary.total_fare));
    }

    if snapshot.buffered_samples > 0 {
        line.push_str(&format!(" | {} samples buffered", snapshot.buffered_samples));
    }

    if let Some(entry) = snapshot.chat.last() {
        line.push_str(&format!(" | chat {}: {} ({:?})", entry.sender, entry.text, entry.status));
    }

    if let Some(notice) = snapshot.notices.last() {
        line.push_str(&format!(" | {}", notice));
    }

    if let Some(error) = &snapshot.last_error {
        line.push_str(&format!(" | error: {}", error));
    }

    line
}

#[test]
fn parses_ride_commands() {
    assert_eq!(parse_line("accept").unwrap(), Input::Command(Command::Accept));
    assert_eq!(
        parse_line("  otp 1234 ").unwrap(),
        Input::Command(Command::VerifyOtp("1234".into()))
    );
    assert_eq!(
        parse_line("arrive 52.1340 -106.67").unwrap(),
        Input::Command(Command::Arrive {
            position: Some(Coordinates::new(52.1340, -106.67))
        })
    );
    assert_eq!(
        parse_line("arrive").unwrap(),
        Input::Command(Command::Arrive { position: None })
    );
    assert_eq!(
        parse_line("cancel rider no-show").unwrap(),
        Input::Command(Command::Cancel {
            reason: Some("rider no-show".into())
        })
    );
    assert_eq!(
        parse_line("rate 5 great trip").unwrap(),
        Input::Command(Command::RateRider {
            rating: 5,
            comment: Some("great trip".into())
        })
    );
    assert_eq!(parse_line("quit").unwrap(), Input::Command(Command::Shutdown));
}

#[test]
fn parses_position_fixes() {
    match parse_line("fix 52.1 -106.6 8.5 90").unwrap() {
        Input::Fix(fix) => {
            assert_eq!((fix.lat, fix.lng), (52.1, -106.6));
            assert_eq!(fix.speed, Some(8.5));
            assert_eq!(fix.heading, Some(90.0));
            assert_eq!(fix.accuracy, None);
        }
        other => panic!("expected a fix, got {:?}", other),
    }
}

#[test]
fn rejects_malformed_lines() {
    for line in ["", "fly", "otp", "rate 9", "rate x", "arrive 52.1", "fix 52.1", "chat"] {
        assert!(parse_line(line).unwrap_err().is_invalid_input_error(), "{}", line);
    }
}
