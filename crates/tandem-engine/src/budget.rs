/// Turn budget for a run: a ceiling on model invocations.
///
/// `turns_taken` is monotone and never exceeds `max_turns`. Exhaustion is a
/// normal terminal condition reported as a structured outcome, never an error.
#[derive(Debug, Clone)]
pub struct RunBudget {
    max_turns: usize,
    turns_taken: usize,
}

impl RunBudget {
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns,
            turns_taken: 0,
        }
    }

    /// Consume one model invocation. Returns `false` when the budget is
    /// already exhausted, leaving the counter untouched.
    pub fn try_consume(&mut self) -> bool {
        if self.turns_taken >= self.max_turns {
            return false;
        }
        self.turns_taken += 1;
        true
    }

    pub fn is_exhausted(&self) -> bool {
        self.turns_taken >= self.max_turns
    }

    pub fn turns_taken(&self) -> usize {
        self.turns_taken
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }
}
