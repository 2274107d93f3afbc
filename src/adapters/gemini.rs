//! Gemini API adapters for script generation and multi-speaker TTS.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;

use super::{ScriptGenerator, SpeechSynthesizer, SynthesizedAudio};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Prompt template for turning arbitrary source content into a
/// two-speaker dialogue script.
const SCRIPT_INSTRUCTIONS: &str = "\
You are writing a lively two-host podcast dialogue about the provided content.
Rules:
- Exactly two hosts. Label every line 'Speaker A:' or 'Speaker B:'.
- Every line is one spoken turn; no stage directions, no markdown.
- Cover the content faithfully; keep turns short and conversational.
- Do not write anything before the first 'Speaker A:' line.";

/// Shared response shapes for `generateContent` calls.
#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: Option<String>,
    data: String,
}

fn api_url(model: &str) -> String {
    format!("{}/models/{}:generateContent", API_BASE, model)
}

async fn post_generate(
    client: &reqwest::Client,
    api_key: &str,
    model: &str,
    body: serde_json::Value,
) -> Result<GenerateContentResponse> {
    let response = client
        .post(api_url(model))
        .header("x-goog-api-key", api_key)
        .json(&body)
        .send()
        .await
        .with_context(|| format!("request to model '{}' failed", model))?;

    let status = response.status();
    if !status.is_success() {
        let detail = response.text().await.unwrap_or_default();
        anyhow::bail!(
            "model '{}' returned {}: {}",
            model,
            status,
            detail.trim()
        );
    }

    response
        .json()
        .await
        .with_context(|| format!("failed to parse response from model '{}'", model))
}

/// Script generation over the Gemini `generateContent` endpoint.
pub struct GeminiScriptGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiScriptGenerator {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        }
    }
}

#[async_trait]
impl ScriptGenerator for GeminiScriptGenerator {
    async fn generate_script(&self, content: &str) -> Result<String> {
        let prompt = format!("{}\n\nContent: {}", SCRIPT_INSTRUCTIONS, content);
        let body = serde_json::json!({
            "contents": [{"parts": [{"text": prompt}]}],
        });

        let response = post_generate(&self.client, &self.api_key, &self.model, body).await?;

        let script: String = response
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .collect();

        if script.trim().is_empty() {
            anyhow::bail!("script generation returned empty result");
        }
        Ok(script)
    }
}

/// Multi-speaker speech synthesis over the Gemini TTS models.
pub struct GeminiSpeechSynthesizer {
    client: reqwest::Client,
    api_key: String,
    model: String,
    language_code: String,
    /// (speaker alias, prebuilt voice name)
    voices: [(String, String); 2],
}

impl GeminiSpeechSynthesizer {
    pub fn new(
        api_key: String,
        model: String,
        language_code: String,
        voice_a: String,
        voice_b: String,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            language_code,
            voices: [
                ("SpeakerA".to_string(), voice_a),
                ("SpeakerB".to_string(), voice_b),
            ],
        }
    }

    fn speech_config(&self) -> serde_json::Value {
        let speaker_configs: Vec<serde_json::Value> = self
            .voices
            .iter()
            .map(|(alias, voice)| {
                serde_json::json!({
                    "speaker": alias,
                    "voiceConfig": {"prebuiltVoiceConfig": {"voiceName": voice}},
                })
            })
            .collect();

        serde_json::json!({
            "languageCode": self.language_code,
            "multiSpeakerVoiceConfig": {"speakerVoiceConfigs": speaker_configs},
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for GeminiSpeechSynthesizer {
    async fn synthesize(&self, prompt: &str) -> Result<SynthesizedAudio> {
        if prompt.trim().is_empty() {
            anyhow::bail!("synthesis prompt cannot be empty");
        }

        let body = serde_json::json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": self.speech_config(),
            },
        });

        let response = post_generate(&self.client, &self.api_key, &self.model, body).await?;

        for candidate in response.candidates {
            let Some(content) = candidate.content else {
                continue;
            };
            for part in content.parts {
                if let Some(inline) = part.inline_data {
                    let data = BASE64
                        .decode(inline.data.as_bytes())
                        .context("failed to decode inline audio payload")?;
                    return Ok(SynthesizedAudio {
                        data,
                        mime_type: inline.mime_type.unwrap_or_else(|| "audio/pcm".to_string()),
                    });
                }
            }
        }

        anyhow::bail!("no audio data in synthesis response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url() {
        assert_eq!(
            api_url("gemini-2.5-flash"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn test_response_parsing_text() {
        let raw = r#"{
            "candidates": [
                {"content": {"parts": [{"text": "Speaker A: Hi."}, {"text": "\nSpeaker B: Hello."}]}}
            ]
        }"#;
        let parsed: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        let text: String = parsed
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .collect();
        assert_eq!(text, "Speaker A: Hi.\nSpeaker B: Hello.");
    }

    #[test]
    fn test_response_parsing_inline_audio() {
        let raw = r#"{
            "candidates": [
                {"content": {"parts": [
                    {"inlineData": {"mimeType": "audio/pcm", "data": "AAEC"}}
                ]}}
            ]
        }"#;
        let parsed: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        let inline = parsed.candidates[0]
            .content
            .as_ref()
            .unwrap()
            .parts[0]
            .inline_data
            .as_ref()
            .unwrap();
        assert_eq!(inline.mime_type.as_deref(), Some("audio/pcm"));
        assert_eq!(BASE64.decode(&inline.data).unwrap(), vec![0u8, 1, 2]);
    }

    #[test]
    fn test_speech_config_shape() {
        let synth = GeminiSpeechSynthesizer::new(
            "key".into(),
            "gemini-2.5-flash-tts".into(),
            "en-US".into(),
            "Puck".into(),
            "Kore".into(),
        );
        let config = synth.speech_config();
        assert_eq!(config["languageCode"], "en-US");
        let speakers = config["multiSpeakerVoiceConfig"]["speakerVoiceConfigs"]
            .as_array()
            .unwrap();
        assert_eq!(speakers.len(), 2);
        assert_eq!(speakers[0]["speaker"], "SpeakerA");
        assert_eq!(
            speakers[1]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Kore"
        );
    }
}
