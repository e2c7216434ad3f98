//! Language-model oracle
//!
//! The request is rendered into a short prompt and the model must answer
//! with a JSON object naming one action. HTTP clients are blocking `ureq`
//! agents, so calls run on tokio's blocking pool.

use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use super::{Oracle, OracleError, OracleFuture, OracleRequest, OracleResponse};
use crate::simulation::traffic_light::Phase;
use crate::simulation::types::Approach;

const OLLAMA_ENDPOINT: &str = "http://localhost:11434";
const OLLAMA_MODEL: &str = "llama3.2";
const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1";
const OPENAI_MODEL: &str = "gpt-4o-mini";
const TEMPERATURE: f32 = 0.1;

const SYSTEM_PROMPT: &str = "You control one traffic signal. Answer with a single JSON object.";

/// A chat-completion backend. Calls block until the model answers or the
/// client's own timeout expires.
pub trait LlmClient: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Send `prompt` and return the raw content of the model's message
    fn complete(&self, prompt: &str) -> Result<String, OracleError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyAction {
    KeepCurrent,
    GreenNorthSouth,
    GreenEastWest,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LlmReply {
    pub action: ReplyAction,
    #[serde(default)]
    pub reasoning: String,
}

impl LlmReply {
    pub fn into_response(self) -> OracleResponse {
        match self.action {
            ReplyAction::KeepCurrent => OracleResponse::NoChange,
            ReplyAction::GreenNorthSouth => OracleResponse::Phase(Phase::NsGreen),
            ReplyAction::GreenEastWest => OracleResponse::Phase(Phase::EwGreen),
        }
    }
}

fn phase_label(phase: Phase) -> &'static str {
    match phase {
        Phase::NsGreen => "north-south green",
        Phase::NsYellow => "north-south yellow",
        Phase::EwGreen => "east-west green",
        Phase::EwYellow => "east-west yellow",
    }
}

fn approach_label(approach: Approach) -> &'static str {
    match approach {
        Approach::North => "north",
        Approach::South => "south",
        Approach::East => "east",
        Approach::West => "west",
    }
}

pub fn render_prompt(request: &OracleRequest) -> String {
    let mut prompt = format!(
        "Intersection {} at tick {}. Signal: {} for {} ticks.\n\
         Approaches (queued / vehicles / density veh/km):\n",
        request.intersection,
        request.tick,
        phase_label(request.phase),
        request.ticks_in_phase
    );
    for approach in Approach::ALL {
        let state = &request.approaches[approach.index()];
        let _ = writeln!(
            prompt,
            "  {}: {} / {} / {:.1}",
            approach_label(approach),
            state.queue_length,
            state.vehicle_count,
            state.density
        );
    }
    prompt.push_str(
        "Rules: only one direction group is green at a time. Favour the group with more \
         waiting vehicles and avoid needless switching.\n\
         Reply as JSON: {\"action\": \"keep_current\" | \"green_north_south\" | \
         \"green_east_west\", \"reasoning\": \"<one sentence>\"}",
    );
    prompt
}

/// Parse the model's message. Markdown code fences around the JSON are tolerated.
pub fn parse_reply(content: &str) -> Result<LlmReply, OracleError> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    serde_json::from_str(body).map_err(|e| OracleError::InvalidReply(format!("{e}: {body}")))
}

pub struct LlmOracle<C: LlmClient> {
    client: Arc<C>,
}

impl<C: LlmClient> LlmOracle<C> {
    pub fn new(client: C) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl<C: LlmClient> Oracle for LlmOracle<C> {
    fn name(&self) -> &str {
        self.client.name()
    }

    fn query(&self, request: OracleRequest) -> OracleFuture {
        let client = Arc::clone(&self.client);
        let prompt = render_prompt(&request);
        Box::pin(async move {
            let content = tokio::task::spawn_blocking(move || client.complete(&prompt))
                .await
                .map_err(|e| OracleError::Transport(format!("request task failed: {e}")))??;
            Ok(parse_reply(&content)?.into_response())
        })
    }
}

fn transport_error(error: ureq::Error) -> OracleError {
    match error {
        ureq::Error::Status(code, response) => {
            OracleError::Unavailable(format!("HTTP {code} from {}", response.get_url()))
        }
        ureq::Error::Transport(transport) => OracleError::Transport(transport.to_string()),
    }
}

fn message_content(value: &Value, pointer: &str) -> Result<String, OracleError> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| OracleError::InvalidReply(format!("no message content at {pointer}")))
}

/// Local Ollama server, `/api/chat` with JSON output
pub struct OllamaClient {
    agent: ureq::Agent,
    url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(endpoint: Option<&str>, model: &str, timeout: Duration) -> Self {
        let base = endpoint.unwrap_or(OLLAMA_ENDPOINT).trim_end_matches('/');
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            url: format!("{base}/api/chat"),
            model: if model.is_empty() { OLLAMA_MODEL } else { model }.to_string(),
        }
    }
}

impl LlmClient for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    fn complete(&self, prompt: &str) -> Result<String, OracleError> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
            "format": "json",
            "stream": false,
            "options": { "temperature": TEMPERATURE },
        });
        let reply: Value = self
            .agent
            .post(&self.url)
            .send_json(body)
            .map_err(transport_error)?
            .into_json()
            .map_err(|e| OracleError::InvalidReply(e.to_string()))?;
        message_content(&reply, "/message/content")
    }
}

/// OpenAI-compatible `/chat/completions` endpoint, authenticated with `OPENAI_API_KEY`
pub struct OpenAiClient {
    agent: ureq::Agent,
    url: String,
    model: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(endpoint: Option<&str>, model: &str, api_key: String, timeout: Duration) -> Self {
        let base = endpoint.unwrap_or(OPENAI_ENDPOINT).trim_end_matches('/');
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            url: format!("{base}/chat/completions"),
            model: if model.is_empty() { OPENAI_MODEL } else { model }.to_string(),
            api_key,
        }
    }

    pub fn from_env(endpoint: Option<&str>, model: &str, timeout: Duration) -> Result<Self, OracleError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| OracleError::Unavailable("OPENAI_API_KEY is not set".to_string()))?;
        Ok(Self::new(endpoint, model, api_key, timeout))
    }
}

impl LlmClient for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    fn complete(&self, prompt: &str) -> Result<String, OracleError> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
            "response_format": { "type": "json_object" },
            "temperature": TEMPERATURE,
        });
        let reply: Value = self
            .agent
            .post(&self.url)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(body)
            .map_err(transport_error)?
            .into_json()
            .map_err(|e| OracleError::InvalidReply(e.to_string()))?;
        message_content(&reply, "/choices/0/message/content")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::strategy::ApproachState;
    use crate::simulation::types::IntersectionId;

    struct Canned(&'static str);

    impl LlmClient for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        fn complete(&self, _prompt: &str) -> Result<String, OracleError> {
            Ok(self.0.to_string())
        }
    }

    fn request() -> OracleRequest {
        let mut approaches = [ApproachState::default(); 4];
        approaches[Approach::East.index()] = ApproachState {
            queue_length: 6,
            vehicle_count: 7,
            density: 70.0,
        };
        OracleRequest {
            tick: 42,
            intersection: IntersectionId(1, 2),
            approaches,
            phase: Phase::NsGreen,
            ticks_in_phase: 17,
        }
    }

    #[test]
    fn prompt_describes_state() {
        let prompt = render_prompt(&request());
        assert!(prompt.contains("Intersection (1, 2) at tick 42"));
        assert!(prompt.contains("north-south green for 17 ticks"));
        assert!(prompt.contains("east: 6 / 7 / 70.0"));
    }

    #[test]
    fn reply_parsing() {
        let reply = parse_reply(r#"{"action": "green_east_west", "reasoning": "east queue"}"#).unwrap();
        assert_eq!(reply.action, ReplyAction::GreenEastWest);
        let fenced = parse_reply("```json\n{\"action\": \"keep_current\"}\n```").unwrap();
        assert_eq!(fenced.action, ReplyAction::KeepCurrent);
        assert!(matches!(
            parse_reply(r#"{"action": "go_faster"}"#),
            Err(OracleError::InvalidReply(_))
        ));
        assert!(parse_reply("switch east please").is_err());
    }

    #[test]
    fn oracle_maps_reply_to_phase() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let oracle = LlmOracle::new(Canned(r#"{"action": "green_east_west", "reasoning": "x"}"#));
        let answer = runtime.block_on(oracle.query(request())).unwrap();
        assert_eq!(answer, OracleResponse::Phase(Phase::EwGreen));

        let oracle = LlmOracle::new(Canned("not json"));
        let answer = runtime.block_on(oracle.query(request()));
        assert!(matches!(answer, Err(OracleError::InvalidReply(_))));
    }
}
