//! Line-oriented text codec.
//!
//! Every message is one UTF-8 line terminated by `\n`:
//!
//! ```text
//! t,<key1>:<x1>:<y1>:<z1>,<key2>:<x2>:<y2>:<z2>,...
//! ```
//!
//! `t` carries exactly 3 decimals and every angle exactly 4. There is no
//! handshake and no length prefix; the newline is the only frame boundary, so
//! a consumer that fails to parse one line simply moves on to the next.

use std::fmt::Write as _;

use crate::{Angles, Frame, JointAngle, StateSnapshot, StreamError};

/// Separates `t` and the joint fields.
pub const FIELD_SEPARATOR: char = ',';

/// Separates a joint key from its components.
pub const COMPONENT_SEPARATOR: char = ':';

/// Render one wire line (including the trailing `\n`) for session time `t`.
///
/// Joints are written in the snapshot's declaration order.
///
/// ```
/// use std::sync::Arc;
/// use anglestream_types::{StateSnapshot, wire};
///
/// let keys: Arc<[String]> = vec!["a".to_string()].into();
/// let snap = StateSnapshot::from_parts(keys, vec![[1.0, 2.0, 3.0]]);
/// assert_eq!(wire::format_line(0.05, &snap), "0.050,a:1.0000:2.0000:3.0000\n");
/// ```
pub fn format_line(t: f64, snapshot: &StateSnapshot) -> String {
    let mut line = String::with_capacity(8 + snapshot.len() * 48);
    // Writing into a String cannot fail.
    let _ = write!(line, "{t:.3}");
    for (key, [x, y, z]) in snapshot.iter() {
        let _ = write!(line, ",{key}:{x:.4}:{y:.4}:{z:.4}");
    }
    line.push('\n');
    line
}

/// Parse one wire line into a [`Frame`].
///
/// A trailing `\n` or `\r\n` is accepted. Returns [`StreamError::Parse`] for
/// blank lines, a non-numeric `t`, joint fields that are not `key:x:y:z`,
/// empty keys, non-numeric or non-finite numbers, and lines without any joint.
pub fn parse_line(line: &str) -> Result<Frame, StreamError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Err(StreamError::Parse("empty line".to_string()));
    }

    let mut fields = line.split(FIELD_SEPARATOR);
    let t = fields
        .next()
        .ok_or_else(|| StreamError::Parse("missing time field".to_string()))
        .and_then(|raw| parse_number(raw, "t"))?;

    let joints = fields.map(parse_joint).collect::<Result<Vec<_>, _>>()?;
    if joints.is_empty() {
        return Err(StreamError::Parse(format!("no joint fields in {line:?}")));
    }

    Ok(Frame { t, joints })
}

fn parse_joint(field: &str) -> Result<JointAngle, StreamError> {
    let mut parts = field.split(COMPONENT_SEPARATOR);
    let (Some(key), Some(x), Some(y), Some(z), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return Err(StreamError::Parse(format!(
            "joint field {field:?} is not key:x:y:z"
        )));
    };

    let key = key.trim();
    if key.is_empty() {
        return Err(StreamError::Parse(format!("empty joint key in {field:?}")));
    }

    let angles: Angles = [
        parse_number(x, key)?,
        parse_number(y, key)?,
        parse_number(z, key)?,
    ];
    Ok(JointAngle {
        key: key.to_string(),
        angles,
    })
}

fn parse_number(raw: &str, what: &str) -> Result<f64, StreamError> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|e| StreamError::Parse(format!("bad number {raw:?} for {what}: {e}")))?;
    if !value.is_finite() {
        return Err(StreamError::Parse(format!("non-finite number {raw:?} for {what}")));
    }
    Ok(value)
}
