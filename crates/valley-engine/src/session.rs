use std::fmt;

use valley_contracts::jobs::Generation;

use crate::error::{Result, WorkflowError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Screen {
    CategorySelect,
    StyleAndPhoto,
    Processing,
    Result,
}

impl Screen {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CategorySelect => "category select",
            Self::StyleAndPhoto => "style and photo",
            Self::Processing => "processing",
            Self::Result => "result",
        }
    }
}

impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Screen-level progression plus the session epoch.
///
/// `CategorySelect -> StyleAndPhoto -> Processing -> Result`, with `back`
/// returning from `StyleAndPhoto` and `reset` returning from anywhere. Any
/// other event is refused with `WorkflowError::Selection` and changes nothing.
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    screen: Screen,
    category: Option<String>,
    generation: Generation,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            screen: Screen::CategorySelect,
            category: None,
            generation: 0,
        }
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn is_current(&self, generation: Generation) -> bool {
        self.generation == generation
    }

    pub fn select_category(&mut self, category_id: &str) -> Result<()> {
        self.expect(Screen::CategorySelect, "select_category")?;
        self.category = Some(category_id.to_string());
        self.screen = Screen::StyleAndPhoto;
        Ok(())
    }

    pub fn pair_ready(&mut self) -> Result<()> {
        self.expect(Screen::StyleAndPhoto, "pair_ready")?;
        self.screen = Screen::Processing;
        Ok(())
    }

    pub fn complete(&mut self) -> Result<()> {
        self.expect(Screen::Processing, "complete")?;
        self.screen = Screen::Result;
        Ok(())
    }

    pub fn back(&mut self) -> Result<()> {
        self.expect(Screen::StyleAndPhoto, "back")?;
        self.category = None;
        self.screen = Screen::CategorySelect;
        Ok(())
    }

    /// Valid from every screen. Returns the new generation.
    pub fn reset(&mut self) -> Generation {
        self.generation += 1;
        self.category = None;
        self.screen = Screen::CategorySelect;
        self.generation
    }

    fn expect(&self, screen: Screen, event: &'static str) -> Result<()> {
        if self.screen != screen {
            return Err(WorkflowError::selection(event, self.screen));
        }
        Ok(())
    }
}
