//! Moderator line banks — announcements, acknowledgments, bridge-backs.
//!
//! Lines rotate deterministically so replayed sessions sound identical.
//! The `{agent}` placeholder is substituted with the panelist's display
//! name.

/// A deterministic rotation of template lines.
#[derive(Debug, Clone)]
pub struct LineBank {
    lines: Vec<String>,
    next: usize,
}

impl LineBank {
    /// Create a bank from template lines.
    pub fn new(lines: Vec<&str>) -> Self {
        Self {
            lines: lines.into_iter().map(String::from).collect(),
            next: 0,
        }
    }

    /// Next line with `{agent}` substituted.
    pub fn next_line(&mut self, agent_name: &str) -> String {
        if self.lines.is_empty() {
            return format!("{}, go ahead.", agent_name);
        }
        let line = self.lines[self.next % self.lines.len()].replace("{agent}", agent_name);
        self.next += 1;
        line
    }
}

/// The moderator voice driven by the coordinator.
#[derive(Debug, Clone)]
pub struct Moderator {
    announcements: LineBank,
    acknowledgments: LineBank,
    bridge_backs: LineBank,
}

impl Moderator {
    /// Create a moderator with the default line banks.
    pub fn new() -> Self {
        Self {
            announcements: LineBank::new(vec![
                "Let's pause there for a moment — {agent} has a question.",
                "Quick interruption: {agent}, you wanted to come in here?",
                "Before we move on, {agent} has something on this.",
            ]),
            acknowledgments: LineBank::new(vec![
                "{agent}, you had a point earlier — go ahead.",
                "Coming back to you, {agent} — the floor is yours.",
                "{agent}, you've been waiting patiently. Please.",
            ]),
            bridge_backs: LineBank::new(vec![
                "Thanks — back to you, please continue.",
                "Good discussion. Let's pick the thread back up.",
                "Noted. Carry on with the deck.",
            ]),
        }
    }

    /// Announcement line handing the floor to an agent.
    pub fn announce(&mut self, agent_name: &str) -> String {
        self.announcements.next_line(agent_name)
    }

    /// Acknowledgment line for a replayed queued request.
    pub fn acknowledge(&mut self, agent_name: &str) -> String {
        self.acknowledgments.next_line(agent_name)
    }

    /// Bridge-back line returning the floor to the presenter.
    pub fn bridge_back(&mut self) -> String {
        self.bridge_backs.next_line("")
    }
}

impl Default for Moderator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_announce_substitutes_name() {
        let mut m = Moderator::new();
        let line = m.announce("Vera");
        assert!(line.contains("Vera"));
    }

    #[test]
    fn test_rotation_deterministic() {
        let mut a = Moderator::new();
        let mut b = Moderator::new();
        for _ in 0..5 {
            assert_eq!(a.announce("X"), b.announce("X"));
            assert_eq!(a.bridge_back(), b.bridge_back());
        }
    }

    #[test]
    fn test_acknowledgment_differs_from_announcement() {
        let mut m = Moderator::new();
        assert_ne!(m.announce("Vera"), m.acknowledge("Vera"));
    }

    #[test]
    fn test_empty_bank_fallback() {
        let mut bank = LineBank::new(vec![]);
        assert_eq!(bank.next_line("Vera"), "Vera, go ahead.");
    }
}
