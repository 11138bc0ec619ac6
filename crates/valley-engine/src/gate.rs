use valley_contracts::catalog::Style;

use crate::photo::Photo;

/// Emitted once when both slots of a `SelectionGate` hold a value.
#[derive(Debug, Clone, PartialEq)]
pub struct PairReady {
    pub photo: Photo,
    pub style: Style,
}

/// What the user still has to provide before the pair completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuideHint {
    /// Nothing picked yet, or the pair already fired.
    Idle,
    /// A photo is in place; ask for a style. Carries the category's style noun.
    ChooseStyle(String),
    UploadPhoto,
}

/// Pair latch over a photo slot and a style slot.
///
/// Both setters run the same level-sensitive check, so the pair fires exactly
/// once no matter which slot is filled last or how often either is
/// overwritten beforehand. After firing the latch stays closed; the owning
/// session replaces the gate to start over.
#[derive(Debug, Clone, Default)]
pub struct SelectionGate {
    photo: Option<Photo>,
    style: Option<Style>,
    fired: bool,
}

impl SelectionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when the latch is already closed; the photo is then ignored.
    pub fn set_photo(&mut self, photo: Photo) -> Option<PairReady> {
        if self.fired {
            return None;
        }
        self.photo = Some(photo);
        self.latch()
    }

    pub fn set_style(&mut self, style: Style) -> Option<PairReady> {
        if self.fired {
            return None;
        }
        self.style = Some(style);
        self.latch()
    }

    pub fn photo(&self) -> Option<&Photo> {
        self.photo.as_ref()
    }

    pub fn style(&self) -> Option<&Style> {
        self.style.as_ref()
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    pub fn guide(&self, style_noun: &str) -> GuideHint {
        match (&self.photo, &self.style, self.fired) {
            (_, _, true) => GuideHint::Idle,
            (Some(_), None, _) => GuideHint::ChooseStyle(style_noun.to_string()),
            (None, Some(_), _) => GuideHint::UploadPhoto,
            _ => GuideHint::Idle,
        }
    }

    fn latch(&mut self) -> Option<PairReady> {
        let (Some(photo), Some(style)) = (&self.photo, &self.style) else {
            return None;
        };
        self.fired = true;
        Some(PairReady {
            photo: photo.clone(),
            style: style.clone(),
        })
    }
}
