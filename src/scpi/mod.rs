//! SCPI command protocol over a [`ByteChannel`](crate::adapters::ByteChannel).
//!
//! - [`ChannelHandle`] owns the open channel and enforces the Open → Closed lifecycle.
//! - [`ScpiSession`] frames commands, reads reply lines and runs query/reply exchanges.
//! - [`SettleStrategy`] decides how long to wait between a query and its reply.

pub mod channel;
pub mod session;
pub mod settle;

pub use channel::{ChannelHandle, RESPONSE_DELIMITER};
pub use session::{encode, ScpiSession, COMMAND_TERMINATOR, IDN_QUERY};
pub use settle::{SettleMode, SettleStrategy, DEFAULT_SETTLE_DELAY};

/// Format a value the way the instrument echoes numbers: six-digit mantissa and a signed,
/// two-digit exponent (`1.000000E-01`).
pub fn format_scientific(value: f64) -> String {
    let formatted = format!("{:.6E}", value);
    match formatted.split_once('E') {
        Some((mantissa, exponent)) => match exponent.parse::<i32>() {
            Ok(exp) => format!(
                "{}E{}{:02}",
                mantissa,
                if exp < 0 { '-' } else { '+' },
                exp.abs()
            ),
            Err(_) => formatted,
        },
        // inf / NaN
        None => formatted,
    }
}
