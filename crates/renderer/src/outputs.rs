//! Output discovery and selection.
//!
//! The compositor advertises outputs as globals and then streams their
//! properties (name, description, modes, scale) in no particular order, closing
//! each burst with a `done` event. [`OutputRegistry`] keeps one record per
//! advertised output and re-evaluates the selection every time a record is
//! completed. It is generic over the protocol handle so the policy can be
//! exercised without a compositor.

use tracing::{debug, trace};

/// Which output the wallpaper should be placed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSelector {
    /// The first output whose name matches exactly.
    Named(String),
    /// Whichever output completed last.
    LastDone,
}

impl OutputSelector {
    pub fn from_target(target: Option<&str>) -> Self {
        match target {
            Some(name) => Self::Named(name.to_string()),
            None => Self::LastDone,
        }
    }
}

/// One property delivered for an output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputProperty {
    Name(String),
    Description(String),
    Mode {
        width: i32,
        height: i32,
        current: bool,
    },
    Scale(i32),
}

#[derive(Debug, Clone)]
pub struct CandidateOutput<H> {
    pub global: u32,
    pub handle: H,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Description up to the first `(`, which is where compositors append the
    /// connector.
    pub identifier: Option<String>,
    pub width: u32,
    pub height: u32,
    pub scale: i32,
    pub done: bool,
}

impl<H> CandidateOutput<H> {
    fn new(global: u32, handle: H) -> Self {
        Self {
            global,
            handle,
            name: None,
            description: None,
            identifier: None,
            width: 0,
            height: 0,
            scale: 1,
            done: false,
        }
    }

    fn apply(&mut self, property: OutputProperty) {
        match property {
            OutputProperty::Name(name) => self.name = Some(name),
            OutputProperty::Description(description) => {
                self.identifier = Some(physical_identifier(&description));
                self.description = Some(description);
            }
            OutputProperty::Mode {
                width,
                height,
                current: true,
            } => {
                self.width = width.max(0) as u32;
                self.height = height.max(0) as u32;
            }
            OutputProperty::Mode { .. } => {}
            OutputProperty::Scale(scale) => self.scale = scale.max(1),
        }
    }
}

/// Snapshot of the chosen output, fixed for the rest of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedOutput<H> {
    pub global: u32,
    pub handle: H,
    pub name: String,
    pub identifier: String,
    pub width: u32,
    pub height: u32,
    pub scale: i32,
}

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("target output not found: no output named '{0}'")]
    NotFound(String),
    #[error("target output not found: the compositor advertised no outputs")]
    NoOutputs,
    #[error("output '{0}' has no current mode")]
    NoMode(String),
}

pub struct OutputRegistry<H> {
    selector: OutputSelector,
    candidates: Vec<CandidateOutput<H>>,
    selected: Option<u32>,
}

impl<H: Clone> OutputRegistry<H> {
    pub fn new(selector: OutputSelector) -> Self {
        Self {
            selector,
            candidates: Vec::new(),
            selected: None,
        }
    }

    pub fn contains(&self, global: u32) -> bool {
        self.candidate(global).is_some()
    }

    pub fn candidates(&self) -> impl Iterator<Item = &CandidateOutput<H>> {
        self.candidates.iter()
    }

    /// Starts tracking a newly advertised output. Re-announcing a known global
    /// keeps its record.
    pub fn discover(&mut self, global: u32, handle: H) {
        if self.contains(global) {
            return;
        }
        trace!(global, "output discovered");
        self.candidates.push(CandidateOutput::new(global, handle));
    }

    pub fn apply(&mut self, global: u32, property: OutputProperty) {
        if let Some(candidate) = self.candidate_mut(global) {
            candidate.apply(property);
        }
    }

    /// Marks `global` complete and re-evaluates the selection.
    pub fn done(&mut self, global: u32) {
        let Some(candidate) = self.candidate_mut(global) else {
            return;
        };
        candidate.done = true;
        let name = candidate.name.clone();
        debug!(
            global,
            name = name.as_deref().unwrap_or("<unnamed>"),
            width = candidate.width,
            height = candidate.height,
            scale = candidate.scale,
            "output ready"
        );

        match &self.selector {
            OutputSelector::LastDone => self.selected = Some(global),
            OutputSelector::Named(target) => {
                if self.selected.is_none() && name.as_deref() == Some(target.as_str()) {
                    self.selected = Some(global);
                }
            }
        }
    }

    /// Forgets an output that went away.
    pub fn remove(&mut self, global: u32) {
        self.candidates.retain(|candidate| candidate.global != global);
        if self.selected == Some(global) {
            debug!(global, "selected output removed");
            self.selected = None;
        }
    }

    /// Forgets the output owning `handle`.
    pub fn remove_handle(&mut self, handle: &H)
    where
        H: PartialEq,
    {
        let global = self
            .candidates
            .iter()
            .find(|candidate| &candidate.handle == handle)
            .map(|candidate| candidate.global);
        if let Some(global) = global {
            self.remove(global);
        }
    }

    pub fn selection(&self) -> Result<SelectedOutput<H>, OutputError> {
        let Some(candidate) = self.selected.and_then(|global| self.candidate(global)) else {
            return Err(match &self.selector {
                OutputSelector::Named(target) => OutputError::NotFound(target.clone()),
                OutputSelector::LastDone => OutputError::NoOutputs,
            });
        };
        let name = candidate
            .name
            .clone()
            .unwrap_or_else(|| format!("output-{}", candidate.global));
        if candidate.width == 0 || candidate.height == 0 {
            return Err(OutputError::NoMode(name));
        }
        Ok(SelectedOutput {
            global: candidate.global,
            handle: candidate.handle.clone(),
            identifier: candidate.identifier.clone().unwrap_or_else(|| name.clone()),
            name,
            width: candidate.width,
            height: candidate.height,
            scale: candidate.scale,
        })
    }

    fn candidate(&self, global: u32) -> Option<&CandidateOutput<H>> {
        self.candidates
            .iter()
            .find(|candidate| candidate.global == global)
    }

    fn candidate_mut(&mut self, global: u32) -> Option<&mut CandidateOutput<H>> {
        self.candidates
            .iter_mut()
            .find(|candidate| candidate.global == global)
    }
}

/// Description truncated at the first parenthesis and trimmed.
pub fn physical_identifier(description: &str) -> String {
    let head = match description.find('(') {
        Some(index) => &description[..index],
        None => description,
    };
    head.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn announce(registry: &mut OutputRegistry<&'static str>, global: u32, name: &'static str) {
        registry.discover(global, name);
        registry.apply(global, OutputProperty::Name(name.to_string()));
        registry.apply(
            global,
            OutputProperty::Mode {
                width: 1280,
                height: 720,
                current: false,
            },
        );
        registry.apply(
            global,
            OutputProperty::Mode {
                width: 1920 + global as i32,
                height: 1080,
                current: true,
            },
        );
    }

    fn run_in_order(selector: OutputSelector, order: &[(u32, &'static str)]) -> OutputRegistry<&'static str> {
        let mut registry = OutputRegistry::new(selector);
        for &(global, name) in order {
            announce(&mut registry, global, name);
        }
        for &(global, _) in order {
            registry.done(global);
        }
        registry
    }

    #[test]
    fn last_done_wins_without_target() {
        let registry = run_in_order(OutputSelector::LastDone, &[(1, "A"), (2, "B"), (3, "C")]);
        let selected = registry.selection().unwrap();
        assert_eq!(selected.name, "C");
        assert_eq!(selected.width, 1923);
        assert_eq!(selected.height, 1080);
    }

    #[test]
    fn named_target_is_selected_regardless_of_order() {
        let orders: [[(u32, &str); 3]; 3] = [
            [(1, "A"), (2, "B"), (3, "C")],
            [(2, "B"), (1, "A"), (3, "C")],
            [(3, "C"), (1, "A"), (2, "B")],
        ];
        for order in orders {
            let registry = run_in_order(OutputSelector::Named("B".into()), &order);
            assert_eq!(registry.selection().unwrap().name, "B", "{order:?}");
        }
    }

    #[test]
    fn named_target_locks_on_first_match() {
        let mut registry = OutputRegistry::new(OutputSelector::Named("DP-1".into()));
        announce(&mut registry, 7, "DP-1");
        announce(&mut registry, 9, "DP-1");
        registry.done(7);
        registry.done(9);
        assert_eq!(registry.selection().unwrap().global, 7);
    }

    #[test]
    fn unmatched_target_is_not_found() {
        let registry = run_in_order(OutputSelector::Named("HDMI-A-1".into()), &[(1, "A")]);
        assert!(matches!(
            registry.selection(),
            Err(OutputError::NotFound(name)) if name == "HDMI-A-1"
        ));
        let empty: OutputRegistry<&str> = OutputRegistry::new(OutputSelector::LastDone);
        assert!(matches!(empty.selection(), Err(OutputError::NoOutputs)));
    }

    #[test]
    fn outputs_are_ineligible_until_done() {
        let mut registry = OutputRegistry::new(OutputSelector::Named("A".into()));
        announce(&mut registry, 1, "A");
        assert!(registry.selection().is_err());
        registry.done(1);
        assert!(registry.selection().is_ok());
    }

    #[test]
    fn later_properties_overwrite_earlier_ones() {
        let mut registry = OutputRegistry::new(OutputSelector::LastDone);
        registry.discover(4, "h");
        registry.apply(4, OutputProperty::Name("old".into()));
        registry.apply(4, OutputProperty::Scale(2));
        registry.apply(
            4,
            OutputProperty::Mode {
                width: 3840,
                height: 2160,
                current: true,
            },
        );
        registry.apply(4, OutputProperty::Name("new".into()));
        registry.apply(
            4,
            OutputProperty::Description("Dell Inc. DELL U2720Q (DP-2)".into()),
        );
        registry.done(4);
        let selected = registry.selection().unwrap();
        assert_eq!(selected.name, "new");
        assert_eq!(selected.identifier, "Dell Inc. DELL U2720Q");
        assert_eq!(selected.scale, 2);
        assert_eq!((selected.width, selected.height), (3840, 2160));
    }

    #[test]
    fn removed_output_cannot_be_selected() {
        let mut registry = run_in_order(OutputSelector::LastDone, &[(1, "A"), (2, "B")]);
        registry.remove_handle(&"B");
        assert!(matches!(registry.selection(), Err(OutputError::NoOutputs)));
        assert!(!registry.contains(2));
    }

    #[test]
    fn output_without_current_mode_is_rejected() {
        let mut registry = OutputRegistry::new(OutputSelector::LastDone);
        registry.discover(1, "h");
        registry.apply(1, OutputProperty::Name("virtual".into()));
        registry.done(1);
        assert!(matches!(registry.selection(), Err(OutputError::NoMode(_))));
    }

    #[test]
    fn identifier_truncates_at_first_parenthesis() {
        assert_eq!(physical_identifier("LG Display 0x0637 (eDP-1)"), "LG Display 0x0637");
        assert_eq!(physical_identifier("Unknown"), "Unknown");
        assert_eq!(physical_identifier("A (x) (y)"), "A");
    }
}
