use crate::config::{PatchOptions, Variant};
use crate::document::Document;
use crate::error::PatchError;
use crate::locator::{self, EntityContext};
use crate::mode_block::{self, BlockAction, ModeRequest};
use crate::mutator::{self, Boundaries, FlagEdit};
use crate::position::{self, Relocation};
use crate::scanner::{self, Block};

/// Result of running every stage over one document.
#[derive(Debug, Clone)]
pub struct PatchOutcome {
    pub document: Document,
    pub ids: (i64, i64),
    pub flag: FlagEdit,
    pub strays_removed: usize,
    pub block: BlockAction,
    pub relocation: Option<Relocation>,
    pub warnings: Vec<String>,
}

impl PatchOutcome {
    pub fn notes(&self) -> Vec<String> {
        let mut notes = Vec::new();
        let flag = match self.flag {
            FlagEdit::Inserted(idx) => Some(("inserted", idx)),
            FlagEdit::Updated(idx) => Some(("updated", idx)),
            FlagEdit::Removed(idx) => Some(("removed", idx)),
            FlagEdit::Unchanged => None,
        };
        if let Some((verb, idx)) = flag {
            notes.push(format!("entity flag {verb} at line {}", idx + 1));
        }
        if self.strays_removed > 0 {
            notes.push(format!(
                "removed {} stray entity flag(s) from other blocks",
                self.strays_removed
            ));
        }
        match self.block {
            BlockAction::Appended => notes.push("mode block appended".into()),
            BlockAction::Replaced { collapsed: 0 } => notes.push("mode block rewritten".into()),
            BlockAction::Replaced { collapsed } => notes.push(format!(
                "mode block rewritten, {collapsed} duplicate(s) collapsed"
            )),
            BlockAction::FlagFlipped => notes.push("mode block deactivated".into()),
            BlockAction::Unchanged => notes.push("mode block unchanged".into()),
        }
        if let Some(Relocation::Relocated { to, landmark_line }) = &self.relocation {
            notes.push(format!(
                "entity moved to ({:.5}, {:.5}) beside the landmark at line {}",
                to.0,
                to.1,
                landmark_line + 1
            ));
        }
        notes
    }
}

struct Stage {
    blocks: Vec<Block>,
    ctx: EntityContext,
}

/// Indices die with every edit, so each stage re-derives them from scratch.
fn derive(doc: &Document, options: &PatchOptions) -> Result<Stage, PatchError> {
    let blocks = scanner::scan(doc)?;
    let ctx = locator::locate_in(doc, &blocks, &options.vocabulary)?;
    Ok(Stage { blocks, ctx })
}

pub fn run_patch(doc: &Document, options: &PatchOptions) -> Result<PatchOutcome, PatchError> {
    let vocab = &options.vocabulary;
    let mut stage = derive(doc, options)?;
    let ids = (stage.ctx.id_i, stage.ctx.id_u);
    let mut current = doc.clone();
    let mut flag = FlagEdit::Unchanged;
    let mut strays_removed = 0;

    if options.entity_effects {
        let (stripped, removed) =
            mutator::strip_outside(&current, &vocab.flag_key, &stage.ctx.block);
        strays_removed = removed;
        if removed > 0 {
            current = stripped;
            stage = derive(&current, options)?;
        }

        let value = match (options.enable, options.has_variant(Variant::DormantAvatar)) {
            (false, _) => None,
            (true, false) => Some("true"),
            (true, true) => Some("false"),
        };
        let bounds = Boundaries {
            id_keys: [vocab.id_i_key.as_str(), vocab.id_u_key.as_str()],
        };
        let (updated, edit) =
            mutator::set_flag(&current, stage.ctx.anchor_line, &vocab.flag_key, value, &bounds);
        flag = edit;
        if edit != FlagEdit::Unchanged {
            current = updated;
            stage = derive(&current, options)?;
        }
    }

    let request = ModeRequest {
        enable: options.enable,
        profile: options.profile,
        ids,
        variants: &options.variants,
        vocab,
    };
    let (normalized, block) = mode_block::normalize(&current, &stage.blocks, &request);
    if block != BlockAction::Unchanged {
        current = normalized;
        stage = derive(&current, options)?;
    }

    let mut warnings = Vec::new();
    let mut relocation = None;
    if options.entity_effects && options.enable {
        let (moved, result) =
            position::validate_and_relocate(&current, &stage.blocks, &stage.ctx, vocab);
        if result == Relocation::NoLandmark {
            warnings.push(format!(
                "{} position is invalid and no `Type {}` landmark was found; left unchanged",
                vocab.entity_type, vocab.landmark_type
            ));
        }
        current = moved;
        relocation = Some(result);
    }

    Ok(PatchOutcome {
        document: current,
        ids,
        flag,
        strays_removed,
        block,
        relocation,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Profile;

    fn sample() -> Document {
        Document::parse(
            &[
                "Version 7",
                "BEGIN Objects",
                "    BEGIN \"[i 0]\"",
                "        Id.i 5",
                "        Id.u 9",
                "        Type Warden",
                "        Pos.x 10.00000",
                "        Pos.y 11.00000",
                "        Timer 120",
                "    END",
                "END",
                "",
            ]
            .join("\r\n"),
        )
    }

    fn options(enable: bool, profile: Profile) -> PatchOptions {
        PatchOptions {
            enable,
            profile,
            ..PatchOptions::default()
        }
    }

    #[test]
    fn enable_compat_end_to_end() {
        let doc = sample();
        let outcome = run_patch(&doc, &options(true, Profile::Compat)).expect("patch");
        let text = outcome.document.render();
        assert!(text.contains("        Timer 120\r\n        AvatarControl true\r\n"));
        assert_eq!(text.matches("BEGIN WardenMode").count(), 1);
        for line in [
            "    IsActive true",
            "    WardenId.i 5",
            "    WardenId.u 9",
            "    CameraFollow true",
            "    BEGIN Roster",
        ] {
            assert!(text.contains(line), "missing {line}");
        }
        for original in doc.lines() {
            assert!(outcome.document.lines().contains(original));
        }
        assert_eq!(outcome.block, BlockAction::Appended);
        assert_eq!(outcome.relocation, Some(Relocation::Valid));
    }

    #[test]
    fn disable_after_enable_round_trips_ids() {
        let doc = sample();
        let enabled = run_patch(&doc, &options(true, Profile::Compat)).expect("enable");
        let disabled =
            run_patch(&enabled.document, &options(false, Profile::Compat)).expect("disable");
        let again =
            run_patch(&disabled.document, &options(true, Profile::Compat)).expect("re-enable");
        assert_eq!(enabled.ids, (5, 9));
        assert_eq!(disabled.ids, (5, 9));
        assert_eq!(again.document, enabled.document);
        assert!(disabled.document.lines().iter().any(|l| l == "    IsActive false"));
        assert!(!disabled.document.lines().iter().any(|l| l.contains("AvatarControl")));
    }

    #[test]
    fn disable_changes_only_the_flag_line() {
        let mut lines: Vec<String> = sample().lines().to_vec();
        lines.extend(
            [
                "BEGIN WardenMode",
                "    IsActive true",
                "    WardenId.i 5",
                "    WardenId.u 9",
                "END",
            ]
            .map(String::from),
        );
        let doc = Document::parse(&(lines.join("\r\n") + "\r\n"));
        let outcome = run_patch(&doc, &options(false, Profile::Full)).expect("disable");
        assert_eq!(outcome.document.len(), doc.len());
        let diffs = doc
            .lines()
            .iter()
            .zip(outcome.document.lines())
            .filter(|(a, b)| a != b)
            .count();
        assert_eq!(diffs, 1);

        let twice = run_patch(&outcome.document, &options(false, Profile::Full)).expect("again");
        assert_eq!(twice.document.render(), outcome.document.render());
    }

    #[test]
    fn entity_effects_can_be_skipped() {
        let doc = sample();
        let mut opts = options(true, Profile::Minimal);
        opts.entity_effects = false;
        let outcome = run_patch(&doc, &opts).expect("patch");
        assert!(!outcome.document.render().contains("AvatarControl"));
        assert_eq!(outcome.relocation, None);
    }

    #[test]
    fn dormant_avatar_writes_false_flag() {
        let doc = sample();
        let mut opts = options(true, Profile::Compat);
        opts.variants = vec![Variant::DormantAvatar];
        let outcome = run_patch(&doc, &opts).expect("patch");
        assert!(outcome.document.render().contains("        AvatarControl false\r\n"));
    }

    #[test]
    fn stray_flags_are_cleared() {
        let text = sample().render()
            + "BEGIN Other\r\n    Type Guard\r\n    AvatarControl true\r\nEND\r\n";
        let doc = Document::parse(&text);
        let outcome = run_patch(&doc, &options(true, Profile::Compat)).expect("patch");
        assert_eq!(outcome.strays_removed, 1);
        assert_eq!(outcome.document.render().matches("AvatarControl").count(), 1);
    }

    #[test]
    fn invalid_position_without_landmark_warns() {
        let text = sample().render().replace("Pos.x 10.00000", "Pos.x 999999");
        let doc = Document::parse(&text);
        let outcome = run_patch(&doc, &options(true, Profile::Compat)).expect("patch");
        assert_eq!(outcome.relocation, Some(Relocation::NoLandmark));
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.document.render().contains("Pos.x 999999"));
    }

    #[test]
    fn invalid_position_moves_near_landmark() {
        let text = sample().render().replace("Pos.x 10.00000", "Pos.x 999999")
            + "BEGIN G\r\n    Type Guard\r\n    Pos.x 50.0\r\n    Pos.y 60.0\r\nEND\r\n";
        let doc = Document::parse(&text);
        let outcome = run_patch(&doc, &options(true, Profile::Compat)).expect("patch");
        let rendered = outcome.document.render();
        assert!(rendered.contains("        Pos.x 51.00000\r\n"));
        assert!(rendered.contains("        Pos.y 61.00000\r\n"));
        assert!(outcome.warnings.is_empty());

        let Some(Relocation::Relocated { landmark_line, .. }) = outcome.relocation else {
            panic!("expected a relocation, got {:?}", outcome.relocation);
        };
        assert_eq!(outcome.document.line(landmark_line), "    Type Guard");
        assert!(
            outcome
                .notes()
                .iter()
                .any(|note| note.ends_with(&format!("line {}", landmark_line + 1)))
        );
    }

    #[test]
    fn noop_disable_keeps_mixed_line_endings() {
        let text = sample().render()
            + "BEGIN WardenMode\r\n    IsActive false\r\nEND\nBEGIN Other\nEND\r\n";
        let doc = Document::parse(&text);
        let outcome = run_patch(&doc, &options(false, Profile::Compat)).expect("disable");
        assert_eq!(outcome.block, BlockAction::Unchanged);
        assert_eq!(outcome.flag, FlagEdit::Unchanged);
        assert_eq!(outcome.document.render(), text);
    }

    #[test]
    fn missing_entity_aborts() {
        let doc = Document::parse("BEGIN A\r\nEND\r\n");
        let err = run_patch(&doc, &options(true, Profile::Compat)).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
