//! Binary control frames.
//!
//! Layout: `[tag][payload length][payload...]`. Payload fields are signed
//! 8-bit values except the gamepad button mask.

use serde::Serialize;
use thiserror::Error;

const IDX_TAG: usize = 0;
const IDX_PAYLOAD_LEN: usize = 1;
const IDX_PAYLOAD: usize = 2;

pub const GAMEPAD_PAYLOAD_LEN: u8 = 7;
pub const ANDROID_PAYLOAD_LEN: u8 = 2;

pub const BUTTON_A: u8 = 0;
pub const BUTTON_B: u8 = 1;
pub const BUTTON_X: u8 = 2;
pub const BUTTON_Y: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommandKind {
    Gamepad = 0,
    Android = 1,
}

impl CommandKind {
    pub fn payload_len(&self) -> u8 {
        match self {
            Self::Gamepad => GAMEPAD_PAYLOAD_LEN,
            Self::Android => ANDROID_PAYLOAD_LEN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("invalid command tag {0}")]
    InvalidTag(u8),
    #[error("invalid payload length for {kind:?}: declared {declared:?}, required {required}")]
    InvalidLength {
        kind: CommandKind,
        declared: Option<u8>,
        required: u8,
    },
    #[error("frame truncated: need {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct GamepadCommand {
    pub left_x: i8,
    pub left_y: i8,
    pub right_x: i8,
    pub right_y: i8,
    pub right_trigger: i8,
    pub left_trigger: i8,
    pub buttons: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AndroidCommand {
    pub slider_x: i8,
    pub slider_y: i8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ControlCommand {
    Gamepad(GamepadCommand),
    Android(AndroidCommand),
}

pub fn decode_command_kind(buf: &[u8]) -> Result<CommandKind, FrameError> {
    match buf.get(IDX_TAG) {
        Some(0) => Ok(CommandKind::Gamepad),
        Some(1) => Ok(CommandKind::Android),
        Some(&tag) => Err(FrameError::InvalidTag(tag)),
        None => Err(FrameError::Truncated {
            needed: 1,
            available: 0,
        }),
    }
}

/// Checks the declared length against `kind` and returns exactly the payload
/// bytes, ignoring anything past the declared length.
fn payload(buf: &[u8], kind: CommandKind) -> Result<&[u8], FrameError> {
    let required = kind.payload_len();
    let declared = buf.get(IDX_PAYLOAD_LEN).copied();
    if declared != Some(required) {
        return Err(FrameError::InvalidLength {
            kind,
            declared,
            required,
        });
    }

    let end = IDX_PAYLOAD + required as usize;
    buf.get(IDX_PAYLOAD..end).ok_or(FrameError::Truncated {
        needed: end,
        available: buf.len(),
    })
}

pub fn decode_gamepad(buf: &[u8]) -> Result<GamepadCommand, FrameError> {
    let p = payload(buf, CommandKind::Gamepad)?;
    Ok(GamepadCommand {
        left_x: p[0] as i8,
        left_y: p[1] as i8,
        right_x: p[2] as i8,
        right_y: p[3] as i8,
        right_trigger: p[4] as i8,
        left_trigger: p[5] as i8,
        buttons: p[6],
    })
}

pub fn decode_android(buf: &[u8]) -> Result<AndroidCommand, FrameError> {
    let p = payload(buf, CommandKind::Android)?;
    Ok(AndroidCommand {
        slider_x: p[0] as i8,
        slider_y: p[1] as i8,
    })
}

/// Decodes the tag, then the payload for that kind.
pub fn decode_frame(buf: &[u8]) -> Result<ControlCommand, FrameError> {
    match decode_command_kind(buf)? {
        CommandKind::Gamepad => decode_gamepad(buf).map(ControlCommand::Gamepad),
        CommandKind::Android => decode_android(buf).map(ControlCommand::Android),
    }
}

/// Whether bit `index` of the button mask is set. Indices past 7 read as released.
pub fn read_button(mask: u8, index: u8) -> bool {
    index < 8 && mask & (1 << index) != 0
}

/// Label used when logging pressed buttons.
pub fn button_name(index: u8) -> &'static str {
    const UNNAMED: [&str; 4] = ["b4", "b5", "b6", "b7"];
    match index {
        BUTTON_A => "A",
        BUTTON_B => "B",
        BUTTON_X => "X",
        BUTTON_Y => "Y",
        4..=7 => UNNAMED[index as usize - 4],
        _ => "?",
    }
}

impl GamepadCommand {
    pub fn button(&self, index: u8) -> bool {
        read_button(self.buttons, index)
    }

    pub fn pressed_buttons(&self) -> impl Iterator<Item = u8> + '_ {
        (0..8).filter(|&i| self.button(i))
    }

    pub fn to_frame(&self) -> [u8; 9] {
        [
            CommandKind::Gamepad as u8,
            GAMEPAD_PAYLOAD_LEN,
            self.left_x as u8,
            self.left_y as u8,
            self.right_x as u8,
            self.right_y as u8,
            self.right_trigger as u8,
            self.left_trigger as u8,
            self.buttons,
        ]
    }
}

impl AndroidCommand {
    pub fn to_frame(&self) -> [u8; 4] {
        [
            CommandKind::Android as u8,
            ANDROID_PAYLOAD_LEN,
            self.slider_x as u8,
            self.slider_y as u8,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(values: &[i16]) -> Vec<u8> {
        values.iter().map(|&v| v as i8 as u8).collect()
    }

    #[test]
    fn decodes_kind() {
        assert_eq!(decode_command_kind(&[0, 7]), Ok(CommandKind::Gamepad));
        assert_eq!(decode_command_kind(&[1, 2]), Ok(CommandKind::Android));
        assert_eq!(decode_command_kind(&[2, 2]), Err(FrameError::InvalidTag(2)));
        assert_eq!(
            decode_command_kind(&[0xff]),
            Err(FrameError::InvalidTag(0xff))
        );
        assert!(matches!(
            decode_command_kind(&[]),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[test]
    fn gamepad_fields_keep_their_sign() {
        let frame = bytes(&[0, 7, -100, 100, -1, 1, -128, 127, 0b1000_0001]);
        let gp = decode_gamepad(&frame).unwrap();
        assert_eq!(gp.left_x, -100);
        assert_eq!(gp.left_y, 100);
        assert_eq!(gp.right_x, -1);
        assert_eq!(gp.right_y, 1);
        assert_eq!(gp.right_trigger, -128);
        assert_eq!(gp.left_trigger, 127);
        assert_eq!(gp.buttons, 0b1000_0001);
        assert!(gp.button(0));
        assert!(gp.button(7));
        assert!(!gp.button(1));
    }

    #[test]
    fn gamepad_roundtrip_over_axis_domain() {
        for v in i8::MIN..=i8::MAX {
            let gp = GamepadCommand {
                left_x: v,
                left_y: v.wrapping_neg(),
                right_x: v.wrapping_add(1),
                right_y: v.wrapping_sub(1),
                right_trigger: v / 2,
                left_trigger: -(v / 2),
                buttons: v as u8,
            };
            assert_eq!(decode_gamepad(&gp.to_frame()), Ok(gp));
        }
    }

    #[test]
    fn wrong_length_is_rejected() {
        let err = decode_gamepad(&[0, 6, 0, 0, 0, 0, 0, 0, 0]).unwrap_err();
        assert_eq!(
            err,
            FrameError::InvalidLength {
                kind: CommandKind::Gamepad,
                declared: Some(6),
                required: 7
            }
        );
        assert!(matches!(
            decode_android(&[1, 7, 0, 0]),
            Err(FrameError::InvalidLength { .. })
        ));
        assert!(matches!(
            decode_android(&[1]),
            Err(FrameError::InvalidLength { declared: None, .. })
        ));
    }

    #[test]
    fn declared_length_beyond_buffer_is_truncated() {
        assert_eq!(
            decode_gamepad(&[0, 7, 1, 2, 3]),
            Err(FrameError::Truncated {
                needed: 9,
                available: 5
            })
        );
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let frame = bytes(&[1, 2, 100, -100, 55, 55, 55]);
        assert_eq!(
            decode_android(&frame),
            Ok(AndroidCommand {
                slider_x: 100,
                slider_y: -100
            })
        );
    }

    #[test]
    fn decode_frame_dispatches_on_tag() {
        assert!(matches!(
            decode_frame(&[1, 2, 0, 0]),
            Ok(ControlCommand::Android(_))
        ));
        assert!(matches!(
            decode_frame(&[0, 2, 0, 0]),
            Err(FrameError::InvalidLength { .. })
        ));
        assert_eq!(decode_frame(&[9, 2, 0, 0]), Err(FrameError::InvalidTag(9)));
    }

    #[test]
    fn buttons() {
        for i in 0..8 {
            assert!(read_button(1 << i, i));
            assert!(!read_button(!(1 << i), i));
        }
        assert!(!read_button(0xff, 8));

        let gp = GamepadCommand {
            buttons: (1 << BUTTON_A) | (1 << BUTTON_Y),
            ..Default::default()
        };
        assert_eq!(gp.pressed_buttons().collect::<Vec<_>>(), vec![0, 3]);
        let names: Vec<_> = gp.pressed_buttons().map(button_name).collect();
        assert_eq!(names, vec!["A", "Y"]);
        assert_eq!(button_name(6), "b6");
        assert!(!gp.button(BUTTON_B));
        assert!(!gp.button(BUTTON_X));
    }
}
