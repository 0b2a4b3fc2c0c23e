//! Providers that work without any external service

use super::provider::{AudioRef, ContentProvider, NarrationProvider, ProviderError, ProviderResult};
use super::request::ContentRequest;
use futures::future::BoxFuture;
use futures::FutureExt;
use uuid::Uuid;

/// Composes a short story from the request fields. Never calls out.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateContentProvider;

impl TemplateContentProvider {
    pub const NAME: &'static str = "template";

    fn compose(request: &ContentRequest) -> ProviderResult<String> {
        if request.character_name.trim().is_empty() {
            return Err(ProviderError::Rejected("no character selected".to_string()));
        }

        let hero = &request.character_name;
        let child = if request.child_name.is_empty() {
            "a sleepy little friend"
        } else {
            request.child_name.as_str()
        };
        let refrain = format!("Ready, steady, {}!", hero);

        let mut story = format!("{} and the {}\n\n", hero, title_case(&request.theme));
        story.push_str(&format!(
            "One evening in {}, {} and {} went to the {}. {}\n\n",
            request.universe, hero, child, request.setting, refrain
        ));
        story.push_str(&format!(
            "Someone needed help, so the two of them set off on a {}. \
             They looked, they listened and they helped. {}\n\n",
            request.theme, refrain
        ));
        story.push_str(&format!(
            "When the job was done, {} yawned a big yawn and {} gave a gentle smile. \
             Back home the stars came out one by one. {}\n\n",
            child, hero, refrain
        ));
        story.push_str("The End. Goodnight.");
        Ok(story)
    }
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

impl ContentProvider for TemplateContentProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn generate<'a>(&'a self, request: &'a ContentRequest) -> BoxFuture<'a, ProviderResult<String>> {
        let story = Self::compose(request);
        async move { story }.boxed()
    }
}

/// Narration placeholder used when no speech backend is configured.
///
/// Always succeeds; the returned reference points at no real audio.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoneNarrationProvider;

impl NoneNarrationProvider {
    pub const NAME: &'static str = "none";
}

impl NarrationProvider for NoneNarrationProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn synthesize<'a>(&'a self, _text: &'a str) -> BoxFuture<'a, ProviderResult<AudioRef>> {
        let uri = format!("placeholder://narration/{}.mp3", Uuid::new_v4());
        async move { Ok(AudioRef::new(uri)) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::request::StoryPreferences;

    #[test]
    fn test_template_story_uses_request() {
        let request = ContentRequest::for_character("Skye", &StoryPreferences::default());
        let story = futures::executor::block_on(TemplateContentProvider.generate(&request)).unwrap();
        assert!(story.starts_with("Skye and the Flying Rescue"));
        assert!(story.contains("Wesley"));
        assert!(story.contains("Sky High"));
        assert!(story.ends_with("Goodnight."));
    }

    #[test]
    fn test_template_rejects_empty_character() {
        let request = ContentRequest::for_character("  ", &StoryPreferences::default());
        let result = futures::executor::block_on(TemplateContentProvider.generate(&request));
        assert!(matches!(result, Err(ProviderError::Rejected(_))));
    }

    #[test]
    fn test_placeholder_narration() {
        let audio = futures::executor::block_on(NoneNarrationProvider.synthesize("story")).unwrap();
        assert!(audio.as_str().starts_with("placeholder://narration/"));
        assert!(audio.as_str().ends_with(".mp3"));
    }
}
