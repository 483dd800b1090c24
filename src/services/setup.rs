use crate::core::project::{Character, Project};
use crate::services::workflow::WorkflowManager;
use anyhow::Result;
use inquire::Select;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAction {
    AnalyzeImage,
    Generate,
    Skip,
}

impl std::fmt::Display for SignatureAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignatureAction::AnalyzeImage => f.write_str("Describe from reference image"),
            SignatureAction::Generate => f.write_str("Invent from the story"),
            SignatureAction::Skip => f.write_str("Skip"),
        }
    }
}

/// Characters that still need a visual signature.
pub fn characters_without_signature(project: &Project) -> Vec<&Character> {
    project
        .story_config
        .characters
        .iter()
        .filter(|c| c.visual_signature.trim().is_empty())
        .collect()
}

pub fn available_actions(character: &Character) -> Vec<SignatureAction> {
    let mut actions = Vec::new();
    if character.reference_image.is_some() {
        actions.push(SignatureAction::AnalyzeImage);
    }
    actions.push(SignatureAction::Generate);
    actions.push(SignatureAction::Skip);
    actions
}

/// Fills in missing character signatures before the script is written.
///
/// Unattended runs take the first available action for every character.
pub async fn run_setup(workflow: &WorkflowManager, unattended: bool) -> Result<()> {
    let Some(project) = workflow.session().project() else {
        return Ok(());
    };
    let pending: Vec<Character> = characters_without_signature(&project).into_iter().cloned().collect();
    if pending.is_empty() {
        return Ok(());
    }

    println!("{} character(s) have no visual signature.", pending.len());
    for character in pending {
        let actions = available_actions(&character);
        let action = if unattended {
            actions[0]
        } else {
            Select::new(&format!("Signature for {} ({}):", character.name, character.role.label()), actions)
                .prompt()?
        };

        let result = match action {
            SignatureAction::AnalyzeImage => workflow.analyze_character(&character.id).await,
            SignatureAction::Generate => workflow.generate_character_signature(&character.id).await,
            SignatureAction::Skip => continue,
        };

        // A missing signature only weakens consistency; keep going.
        match result {
            Ok(()) => {
                if let Some(updated) = workflow.session().project().and_then(|p| p.character(&character.id).cloned()) {
                    println!("{}: {}", updated.name, updated.visual_signature);
                }
            }
            Err(e) => {
                log::warn!("Could not create a signature for {}: {:#}", character.name, e);
                println!("Skipping {}: {:#}", character.name, e);
            }
        }
    }

    workflow.save_project().await
}
