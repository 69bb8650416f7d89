//! Input handling.
//!
//! Windowing and device polling belong to the host. This module only turns a
//! sampled [`InputState`] into the `INPUT` message sent to the remote.

use bitflags::bitflags;
use netsync_shared::protocol::InputCommand;

bitflags! {
    /// Buttons held during a sample.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Buttons: u8 {
        const LEFT = 1 << 0;
        const RIGHT = 1 << 1;
        const JUMP = 1 << 2;
        const FIRE = 1 << 3;
        const WEAPON_NEXT = 1 << 4;
        const WEAPON_PREV = 1 << 5;
    }
}

/// User input state at a moment in time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputState {
    pub buttons: Buttons,
    /// Aim angle in radians.
    pub aim: f32,
}

impl InputState {
    /// Horizontal intent: -1, 0 or 1.
    pub fn walk_axis(self) -> i8 {
        i8::from(self.buttons.contains(Buttons::RIGHT)) - i8::from(self.buttons.contains(Buttons::LEFT))
    }
}

/// Tags sampled input with the remote tick it applies to.
pub fn build_command(tick: u16, input: InputState) -> InputCommand {
    InputCommand {
        tick,
        buttons: input.buttons.bits(),
        aim: input.aim,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_carries_button_bits() {
        let input = InputState {
            buttons: Buttons::LEFT | Buttons::FIRE,
            aim: 0.5,
        };
        let cmd = build_command(77, input);
        assert_eq!(cmd.tick, 77);
        assert_eq!(cmd.buttons, 0b1001);
        assert_eq!(cmd.aim, 0.5);
        assert_eq!(Buttons::from_bits_truncate(cmd.buttons), input.buttons);
    }

    #[test]
    fn opposing_directions_cancel() {
        let mut input = InputState::default();
        assert_eq!(input.walk_axis(), 0);
        input.buttons |= Buttons::LEFT;
        assert_eq!(input.walk_axis(), -1);
        input.buttons |= Buttons::RIGHT;
        assert_eq!(input.walk_axis(), 0);
    }
}
