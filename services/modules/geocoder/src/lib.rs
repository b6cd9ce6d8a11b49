//! Station Geocoder
//!
//! Answers `/address` typeahead requests from the station names of the
//! loaded schedule. Every query token must occur in a station name
//! (case-insensitive). Names where each token starts a word rank above
//! plain substring matches; within a rank shorter names come first.

use controller::{DispatchContext, InitContext, Module, OpMetadata, ParamSpec, Registry, Result};
use schedule::{Schedule, Station};
use tracing::debug;
use types::{Address, AddressRequest, AddressResponse, Message, MsgPtr};

pub const MODULE_ID: &str = "geocoder";
pub const DEFAULT_MAX_GUESSES: usize = 10;

pub struct Geocoder {
    max_guesses: usize,
}

impl Default for Geocoder {
    fn default() -> Self {
        Self {
            max_guesses: DEFAULT_MAX_GUESSES,
        }
    }
}

impl Geocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_guesses(&self) -> usize {
        self.max_guesses
    }
}

impl Module for Geocoder {
    fn name(&self) -> &str {
        "Station Geocoder"
    }

    fn id(&self) -> &str {
        MODULE_ID
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::optional(
            "max_guesses",
            "maximum number of guesses per response",
            DEFAULT_MAX_GUESSES,
        )]
    }

    fn set_param(&mut self, name: &str, value: &str) -> std::result::Result<(), String> {
        match name {
            "max_guesses" => {
                let parsed: usize = value
                    .trim()
                    .parse()
                    .map_err(|e| format!("expected a positive integer, got {:?} ({})", value, e))?;
                if parsed == 0 {
                    return Err("must be at least 1".to_string());
                }
                self.max_guesses = parsed;
                Ok(())
            }
            other => Err(format!("unknown parameter {}", other)),
        }
    }

    fn init(&mut self, registry: &mut Registry, ctx: &InitContext) -> Result<()> {
        if ctx.schedule().is_none() {
            debug!(module = MODULE_ID, "No schedule yet, /address fails until one is loaded");
        }

        let max_guesses = self.max_guesses;
        registry.register_op(
            "/address",
            move |msg: MsgPtr, ctx: DispatchContext| async move { lookup(msg, ctx, max_guesses) },
            OpMetadata::new("Station name typeahead").requires_schedule(),
        )
    }
}

fn lookup(msg: MsgPtr, ctx: DispatchContext, max_guesses: usize) -> Result<MsgPtr> {
    let request: &AddressRequest = msg.expect_content()?;
    let schedule = ctx.schedule()?;

    let guesses = suggest(&schedule, &request.input, max_guesses);
    debug!(input = %request.input, guesses = guesses.len(), "Geocoded");

    Ok(Message::from_content(msg.target(), AddressResponse { guesses }).into_shared())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum MatchQuality {
    WordPrefix,
    Substring,
}

fn match_quality(name: &str, tokens: &[String]) -> Option<MatchQuality> {
    let name = name.to_lowercase();
    if !tokens.iter().all(|token| name.contains(token.as_str())) {
        return None;
    }

    let words: Vec<&str> = name.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()).collect();
    let word_prefix = tokens
        .iter()
        .all(|token| words.iter().any(|word| word.starts_with(token.as_str())));

    Some(if word_prefix {
        MatchQuality::WordPrefix
    } else {
        MatchQuality::Substring
    })
}

/// Ranked station guesses for `input`, at most `max_guesses`
pub fn suggest(schedule: &Schedule, input: &str, max_guesses: usize) -> Vec<Address> {
    let tokens: Vec<String> = input.split_whitespace().map(str::to_lowercase).collect();
    if tokens.is_empty() || max_guesses == 0 {
        return Vec::new();
    }

    let mut matches: Vec<(MatchQuality, &Station)> = schedule
        .stations()
        .iter()
        .filter_map(|station| match_quality(&station.name, &tokens).map(|quality| (quality, station)))
        .collect();

    matches.sort_by(|(qa, a), (qb, b)| {
        qa.cmp(qb)
            .then_with(|| a.name.chars().count().cmp(&b.name.chars().count()))
            .then_with(|| a.name.cmp(&b.name))
    });

    matches
        .into_iter()
        .take(max_guesses)
        .map(|(_, station)| Address {
            pos: station.pos,
            name: station.name.clone(),
            kind: "station".to_string(),
            regions: Vec::new(),
        })
        .collect()
}
