//! Prompt construction. Everything here is pure string assembly.

use crate::core::project::{
    Character, ImageStyleConfig, Pacing, PlotTwist, Scene, StoryConfig, VoiceConfig,
};
use serde_json::{json, Value};

/// Characters referenced by `names`, in configured order.
///
/// A character matches when, ignoring case, its name contains a listed name
/// or a listed name contains it. Blank names on either side never match, so
/// "Voss" finds "Dr. Voss" and "Dr. Voss" finds "Voss". Short names can
/// over-match ("Al" inside "Alice"); that is accepted.
pub fn find_active_characters<'a>(names: &[String], characters: &'a [Character]) -> Vec<&'a Character> {
    let wanted: Vec<String> = names
        .iter()
        .map(|n| n.trim().to_lowercase())
        .filter(|n| !n.is_empty())
        .collect();

    characters
        .iter()
        .filter(|c| {
            let name = c.name.trim().to_lowercase();
            !name.is_empty() && wanted.iter().any(|w| name.contains(w.as_str()) || w.contains(name.as_str()))
        })
        .collect()
}

pub fn style_block(style: &ImageStyleConfig) -> String {
    format!(
        "GLOBAL STYLE (apply to the whole image):\n\
         - Art style: {}\n\
         - Lighting: {}\n\
         - Color grade: {}\n\
         - Camera angle: {}\n\
         - Character look: {}\n\
         - Clothing style: {}\n\
         Unify every element under this style. Render each character exactly as described \
         below and never blend features between characters.",
        style.art_style,
        style.lighting,
        style.color_grade,
        style.camera_angle,
        style.character_look,
        style.clothing_style
    )
}

pub fn character_block(character: &Character) -> String {
    format!(
        "CHARACTER: {} ({})\nAppearance: {}",
        character.name,
        character.role.label(),
        character.visual_signature
    )
}

/// Style first, then one block per active character, then the scene action.
pub fn build_image_prompt(style: &ImageStyleConfig, characters: &[Character], scene: &Scene) -> String {
    let mut sections = vec![style_block(style)];
    sections.extend(
        find_active_characters(&scene.character_names, characters)
            .into_iter()
            .map(character_block),
    );
    sections.push(format!("SCENE ACTION:\n{}", scene.image_prompt));
    sections.join("\n\n")
}

pub fn build_video_prompt(style: &ImageStyleConfig, scene: &Scene) -> String {
    format!(
        "{}\nVisual style: {}, {}, {}.",
        scene.motion_prompt, style.art_style, style.lighting, style.color_grade
    )
}

/// Text handed to the speech model: a style directive followed by the narrative.
pub fn speech_text(voice: &VoiceConfig, narrative: &str) -> String {
    format!(
        "Read aloud in a {} tone with a {} {} accent: {}",
        voice.tone, voice.dialect, voice.language, narrative
    )
}

pub fn script_system_prompt() -> String {
    "You are a screenwriter producing narrated, illustrated short stories. \
     Return only valid JSON matching the requested schema.\n\
     Keep three concerns strictly separate in every scene:\n\
     1. narrative: the spoken narration only. Describe actions, emotions and events. \
     Never describe static visual details such as hair, clothing or faces.\n\
     2. imagePrompt: the visual composition of one still frame. Refer to characters \
     by name only and never describe their appearance; appearance is supplied separately.\n\
     3. motionPrompt: camera movement only (pan, tilt, dolly, zoom, tracking shot, crane), \
     independent of the narrative.\n\
     characterNames lists the names of every character visible in the scene."
        .to_string()
}

fn pacing_hint(pacing: Pacing) -> &'static str {
    match pacing {
        Pacing::Slow => "slow and contemplative, letting moments breathe",
        Pacing::Balanced => "balanced between action and reflection",
        Pacing::Fast => "fast, every scene moving the plot forward",
    }
}

fn twist_hint(twist: PlotTwist) -> &'static str {
    match twist {
        PlotTwist::None => "No plot twist.",
        PlotTwist::Mild => "Include a mild, foreshadowed plot twist.",
        PlotTwist::Shocking => "Include a shocking plot twist near the end.",
    }
}

pub fn script_user_prompt(story: &StoryConfig, voice: &VoiceConfig, style: &ImageStyleConfig) -> String {
    let named: Vec<&Character> = story.characters.iter().filter(|c| !c.name.trim().is_empty()).collect();
    let cast = if named.is_empty() {
        format!("Invent {} characters.", story.character_count)
    } else {
        named
            .iter()
            .map(|c| format!("- {} ({})", c.name.trim(), c.role.label()))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "Write a story in exactly {} scenes.\n\
         Premise: {}\n\
         Setting: {}\n\
         Genre: {}\n\
         Pacing: {}\n\
         {}\n\
         Narration: written in {} to be read aloud in a {} tone with a {} dialect.\n\n\
         Visual style for every imagePrompt:\n\
         - Art style: {}\n\
         - Lighting: {}\n\
         - Color grade: {}\n\
         - Camera angle: {}\n\
         - Character look: {}\n\
         - Clothing style: {}\n\
         Compose each frame in this style. Name characters, never describe how they look.\n\n\
         Characters:\n{}\n\n\
         Return JSON: {{\"title\", \"summary\", \"scenes\": [{{\"sceneNumber\", \"narrative\", \
         \"imagePrompt\", \"motionPrompt\", \"characterNames\"}}]}}",
        story.scene_count,
        story.premise,
        story.setting,
        story.category,
        pacing_hint(story.pacing),
        twist_hint(story.plot_twist),
        voice.language,
        voice.tone,
        voice.dialect,
        style.art_style,
        style.lighting,
        style.color_grade,
        style.camera_angle,
        style.character_look,
        style.clothing_style,
        cast
    )
}

pub fn script_response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "title": { "type": "STRING" },
            "summary": { "type": "STRING" },
            "scenes": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "sceneNumber": { "type": "INTEGER" },
                        "narrative": { "type": "STRING" },
                        "imagePrompt": { "type": "STRING" },
                        "motionPrompt": { "type": "STRING" },
                        "characterNames": { "type": "ARRAY", "items": { "type": "STRING" } }
                    },
                    "required": ["sceneNumber", "narrative", "imagePrompt", "motionPrompt", "characterNames"]
                }
            }
        },
        "required": ["title", "summary", "scenes"]
    })
}

pub fn character_analysis_prompt(language: &str) -> String {
    format!(
        "Describe the person in this image as a reusable visual signature for an illustrator. \
         Cover face shape, hair (color, length, style), eye color, skin tone, build, age range, \
         clothing and any distinctive marks. One dense paragraph, no story, no background. \
         Answer in {}.",
        language
    )
}

pub fn signature_prompt(character: &Character, story: &StoryConfig, style: &ImageStyleConfig, language: &str) -> String {
    format!(
        "Invent a precise visual signature for {}, the {} of this story.\n\
         Premise: {}\n\
         Setting: {}\n\
         Art style: {}\n\
         Cover face, hair, eyes, build, age range, clothing and one distinctive detail. \
         One dense paragraph of appearance only. Answer in {}.",
        character.name,
        character.role.label().to_lowercase(),
        story.premise,
        story.setting,
        style.art_style,
        language
    )
}
