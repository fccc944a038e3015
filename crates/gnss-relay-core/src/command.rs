//! Receiver command scripts.
//!
//! A command script is plain text split into ordered sections by lines that
//! start with `@`:
//!
//! ```text
//! # input start        (section 0)
//! @
//! # input stop         (section 1)
//! @
//! # output start       (section 2)
//! @
//! # output stop        (section 3)
//! ```
//!
//! A classic two-section receiver command file therefore configures the input
//! receiver on start and resets it on stop. Inside a section, `!WAIT ms` pauses
//! between commands, lines starting with `#` and blank lines are skipped, and
//! every other line is sent terminated by `\r\n`.

use std::time::Duration;

/// Which side of the relay a command block targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRole {
    Input,
    Output,
}

/// When a command block is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandPhase {
    Start,
    Stop,
}

/// One executable step of a command block.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandStep {
    /// Bytes to write to the stream (line terminator included).
    Send(Vec<u8>),
    /// Pause before the next step.
    Wait(Duration),
}

const SECTION_COUNT: usize = 4;

/// Parsed command script.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandScript {
    sections: [Vec<CommandStep>; SECTION_COUNT],
}

impl CommandScript {
    /// Parse script text. Sections beyond the fourth are ignored.
    pub fn parse(text: &str) -> Self {
        let mut script = Self::default();
        let mut section = 0usize;

        for raw in text.lines() {
            let line = raw.trim_end_matches('\r');
            if line.starts_with('@') {
                section += 1;
                continue;
            }
            if section >= SECTION_COUNT {
                continue;
            }
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let step = match parse_wait(trimmed) {
                Some(wait) => CommandStep::Wait(wait),
                None => {
                    let mut bytes = trimmed.as_bytes().to_vec();
                    bytes.extend_from_slice(b"\r\n");
                    CommandStep::Send(bytes)
                }
            };
            script.sections[section].push(step);
        }
        script
    }

    /// Steps for the given role and phase, in order.
    pub fn steps(&self, role: StreamRole, phase: CommandPhase) -> &[CommandStep] {
        let index = match (role, phase) {
            (StreamRole::Input, CommandPhase::Start) => 0,
            (StreamRole::Input, CommandPhase::Stop) => 1,
            (StreamRole::Output, CommandPhase::Start) => 2,
            (StreamRole::Output, CommandPhase::Stop) => 3,
        };
        &self.sections[index]
    }

    /// True when no section contains any step.
    pub fn is_empty(&self) -> bool {
        self.sections.iter().all(Vec::is_empty)
    }
}

fn parse_wait(line: &str) -> Option<Duration> {
    let rest = line.strip_prefix("!WAIT")?;
    let ms = rest.trim().parse::<u64>().ok()?;
    Some(Duration::from_millis(ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SCRIPT: &str = "\
# u-blox start
!UBX CFG-RATE 1000 1 1
unlogall
!WAIT 200
log rangecmpb ontime 1
@
unlogall

@
OUTPUT-START
@
OUTPUT-STOP
@
ignored
";

    #[test]
    fn test_sections() {
        let script = CommandScript::parse(SCRIPT);
        assert_eq!(
            script.steps(StreamRole::Input, CommandPhase::Start),
            &[
                CommandStep::Send(b"!UBX CFG-RATE 1000 1 1\r\n".to_vec()),
                CommandStep::Send(b"unlogall\r\n".to_vec()),
                CommandStep::Wait(Duration::from_millis(200)),
                CommandStep::Send(b"log rangecmpb ontime 1\r\n".to_vec()),
            ]
        );
        assert_eq!(
            script.steps(StreamRole::Input, CommandPhase::Stop),
            &[CommandStep::Send(b"unlogall\r\n".to_vec())]
        );
        assert_eq!(
            script.steps(StreamRole::Output, CommandPhase::Start),
            &[CommandStep::Send(b"OUTPUT-START\r\n".to_vec())]
        );
        assert_eq!(
            script.steps(StreamRole::Output, CommandPhase::Stop),
            &[CommandStep::Send(b"OUTPUT-STOP\r\n".to_vec())]
        );
    }

    #[test]
    fn test_two_section_file() {
        let script = CommandScript::parse("start\r\n@\r\nstop\r\n");
        assert_eq!(script.steps(StreamRole::Input, CommandPhase::Start).len(), 1);
        assert_eq!(script.steps(StreamRole::Input, CommandPhase::Stop).len(), 1);
        assert!(script.steps(StreamRole::Output, CommandPhase::Start).is_empty());
    }

    #[test]
    fn test_empty_script() {
        assert!(CommandScript::parse("\n# only comments\n").is_empty());
    }
}
