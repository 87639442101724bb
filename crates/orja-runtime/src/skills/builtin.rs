//! Built-in skills: `help`, `time` and `timer`.

use chrono::Local;

use orja_core::{extract_minutes, minutes_argument};

use super::{Skill, SkillArguments, SkillError, SkillSet};

/// Lists the other registered skills.
#[derive(Debug, Clone)]
pub struct HelpSkill {
    lines: Vec<String>,
}

impl HelpSkill {
    /// Describe every skill currently in `skills`.
    pub fn describing(skills: &SkillSet) -> Self {
        Self {
            lines: skills
                .iter()
                .map(|skill| format!("{} ({})", skill.name(), skill.summary()))
                .collect(),
        }
    }
}

impl Skill for HelpSkill {
    fn name(&self) -> &str {
        "help"
    }

    fn summary(&self) -> &str {
        "list what the assistant can do"
    }

    fn invoke(&self, _request: &str, _arguments: &SkillArguments) -> Result<String, SkillError> {
        let mut text = String::from("I can help with: help (list commands)");
        for line in &self.lines {
            text.push_str(", ");
            text.push_str(line);
        }
        text.push_str(". Anything else is answered by the local model.");
        Ok(text)
    }
}

/// Reports the local wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeSkill;

impl Skill for TimeSkill {
    fn name(&self) -> &str {
        "time"
    }

    fn summary(&self) -> &str {
        "tell the current local time"
    }

    fn invoke(&self, _request: &str, _arguments: &SkillArguments) -> Result<String, SkillError> {
        Ok(format!("It is {} local time.", Local::now().format("%H:%M:%S")))
    }
}

/// Acknowledges a countdown. No timer is actually scheduled.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimerSkill;

impl Skill for TimerSkill {
    fn name(&self) -> &str {
        "timer"
    }

    fn summary(&self) -> &str {
        "set a countdown timer, argument minutes (integer)"
    }

    fn invoke(&self, request: &str, arguments: &SkillArguments) -> Result<String, SkillError> {
        let minutes = minutes_argument(arguments).or_else(|| extract_minutes(request));
        Ok(match minutes {
            Some(minutes) => format!("OK, timer set for {minutes} min (placeholder)."),
            None => "I could not recognize the timer duration, please try again.".to_string(),
        })
    }
}
