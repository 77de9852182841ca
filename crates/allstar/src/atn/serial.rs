//! Serialized ATN format.
//!
//! A grammar compiler emits the ATN as a flat sequence of 16-bit code
//! units; the runtime loads it once and never touches the encoding again.
//! The layout is section-ordered: header (version, UUID, grammar kind,
//! vocabulary bound), rule tables, mode table, interval-set pool, state
//! table, transition table, decision table, lexer actions. Token types are
//! stored shifted by 2 so EOF (−1) fits in an unsigned unit.
//!
//! Loading is version- and UUID-gated: a mismatch fails with
//! `UnsupportedOperation` before anything else is read. Structural damage
//! (dangling state references, unknown tags) fails with `IllegalState`;
//! truncation with `IndexOutOfBounds`.

use super::state::AtnStateKind;
use super::transition::{Transition, TransitionKind};
use super::{Atn, GrammarKind, LexerAction};
use crate::error::RecognitionError;
use crate::interval::IntervalSet;

/// Format version this build reads and writes.
pub const SERIALIZED_VERSION: u16 = 1;

/// Identity of the layout; bumped only on incompatible reorderings.
pub const SERIALIZED_UUID: [u16; 8] = [
    0x59b2, 0x4de4, 0x11e6, 0x8ec0, 0x7b4a, 0x9986, 0xb3b1, 0xa2c6,
];

/// Token types are shifted by this much on the wire so EOF and the epsilon
/// marker encode as unsigned units.
const TOKEN_SHIFT: i32 = 2;

fn emit(out: &mut Vec<u16>, value: usize) -> Result<(), RecognitionError> {
    u16::try_from(value)
        .map(|w| out.push(w))
        .map_err(|_| RecognitionError::UnsupportedOperation(format!(
            "value {value} does not fit the 16-bit serialized form"
        )))
}

fn emit_token(out: &mut Vec<u16>, token_type: i32) -> Result<(), RecognitionError> {
    emit(out, usize::try_from(token_type + TOKEN_SHIFT).map_err(|_| {
        RecognitionError::UnsupportedOperation(format!("token type {token_type} not encodable"))
    })?)
}

fn state_kind_tag(kind: &AtnStateKind) -> (u16, usize, bool) {
    // (tag, payload state number, extra flag)
    match kind {
        AtnStateKind::Basic => (0, 0, false),
        AtnStateKind::RuleStart {
            stop_state,
            is_left_recursive,
        } => (1, *stop_state, *is_left_recursive),
        AtnStateKind::RuleStop => (2, 0, false),
        AtnStateKind::BlockStart { end_state } => (3, *end_state, false),
        AtnStateKind::BlockEnd { start_state } => (4, *start_state, false),
        AtnStateKind::PlusBlockStart { loopback } => (5, *loopback, false),
        AtnStateKind::PlusLoopback => (6, 0, false),
        AtnStateKind::StarBlockStart => (7, 0, false),
        AtnStateKind::StarLoopEntry {
            loopback,
            precedence_decision,
        } => (8, *loopback, *precedence_decision),
        AtnStateKind::StarLoopback => (9, 0, false),
        AtnStateKind::LoopEnd { loopback } => (10, *loopback, false),
        AtnStateKind::TokenStart => (11, 0, false),
    }
}

/// Serialize `atn` to its 16-bit code unit form.
///
/// # Errors
///
/// `UnsupportedOperation` when a value (state count, token type) exceeds the
/// 16-bit encoding.
pub fn serialize(atn: &Atn) -> Result<Vec<u16>, RecognitionError> {
    let mut out = Vec::with_capacity(64);
    out.push(SERIALIZED_VERSION);
    out.extend_from_slice(&SERIALIZED_UUID);
    out.push(match atn.grammar_kind {
        GrammarKind::Lexer => 0,
        GrammarKind::Parser => 1,
    });
    emit_token(&mut out, atn.max_token_type)?;

    // Rule tables.
    emit(&mut out, atn.rule_to_start_state.len())?;
    for i in 0..atn.rule_to_start_state.len() {
        emit(&mut out, atn.rule_to_start_state[i])?;
        emit(&mut out, atn.rule_to_stop_state[i])?;
        if atn.grammar_kind == GrammarKind::Lexer {
            emit_token(&mut out, atn.rule_to_token_type[i])?;
        }
    }

    // Modes.
    emit(&mut out, atn.mode_to_start_state.len())?;
    for &s in &atn.mode_to_start_state {
        emit(&mut out, s)?;
    }

    // Interval-set pool: collect sets referenced by transitions, in first-use
    // order, and rewrite transitions to pool indices.
    let mut sets: Vec<&IntervalSet> = Vec::new();
    for state in atn.states() {
        for t in &state.transitions {
            if let TransitionKind::Set { set } | TransitionKind::NotSet { set } = &t.kind {
                if !sets.contains(&set) {
                    sets.push(set);
                }
            }
        }
    }
    emit(&mut out, sets.len())?;
    for set in &sets {
        emit(&mut out, set.intervals().len())?;
        for iv in set.intervals() {
            emit_token(&mut out, iv.start)?;
            emit_token(&mut out, iv.stop)?;
        }
    }

    // State table.
    emit(&mut out, atn.state_count())?;
    for state in atn.states() {
        let (tag, arg, flag) = state_kind_tag(&state.kind);
        out.push(tag);
        emit(&mut out, state.rule_index)?;
        emit(&mut out, state.decision.map_or(0, |d| d + 1))?;
        out.push(u16::from(state.non_greedy) | (u16::from(flag) << 1));
        emit(&mut out, arg)?;
    }

    // Transition table. Return edges out of rule stop states are derived
    // data regenerated at load time, so they are not written.
    let transition_count: usize = atn
        .states()
        .iter()
        .filter(|s| !s.is_rule_stop())
        .map(|s| s.transitions.len())
        .sum();
    emit(&mut out, transition_count)?;
    for state in atn.states() {
        if state.is_rule_stop() {
            continue;
        }
        for t in &state.transitions {
            emit(&mut out, state.number)?;
            emit(&mut out, t.target)?;
            let (tag, a, b, c) = match &t.kind {
                TransitionKind::Epsilon {
                    outermost_precedence_return,
                } => (0, outermost_precedence_return.map_or(0, |r| r + 1), 0, 0),
                TransitionKind::Atom { label } => {
                    (1, usize::try_from(label + TOKEN_SHIFT).unwrap_or(0), 0, 0)
                }
                TransitionKind::Range { start, stop } => (
                    2,
                    usize::try_from(start + TOKEN_SHIFT).unwrap_or(0),
                    usize::try_from(stop + TOKEN_SHIFT).unwrap_or(0),
                    0,
                ),
                TransitionKind::Set { set } => {
                    (3, sets.iter().position(|s| *s == set).unwrap_or(0), 0, 0)
                }
                TransitionKind::NotSet { set } => {
                    (4, sets.iter().position(|s| *s == set).unwrap_or(0), 0, 0)
                }
                TransitionKind::Wildcard => (5, 0, 0, 0),
                TransitionKind::Rule {
                    rule_index,
                    precedence,
                    follow_state,
                } => (6, *rule_index, *precedence as usize, *follow_state),
                TransitionKind::Predicate {
                    rule_index,
                    pred_index,
                    is_ctx_dependent,
                } => (7, *rule_index, *pred_index, usize::from(*is_ctx_dependent)),
                TransitionKind::Precedence { precedence } => (8, *precedence as usize, 0, 0),
                TransitionKind::Action {
                    rule_index,
                    action_index,
                    is_ctx_dependent,
                } => (9, *rule_index, *action_index, usize::from(*is_ctx_dependent)),
            };
            out.push(tag);
            emit(&mut out, a)?;
            emit(&mut out, b)?;
            emit(&mut out, c)?;
        }
    }

    // Decision table.
    emit(&mut out, atn.decision_to_state.len())?;
    for &s in &atn.decision_to_state {
        emit(&mut out, s)?;
    }

    // Lexer actions.
    emit(&mut out, atn.lexer_actions.len())?;
    for action in &atn.lexer_actions {
        let (tag, d1, d2) = match action {
            LexerAction::Skip => (0u16, 0, 0),
            LexerAction::More => (1, 0, 0),
            LexerAction::PopMode => (2, 0, 0),
            LexerAction::Mode { mode } => (3, *mode, 0),
            LexerAction::PushMode { mode } => (4, *mode, 0),
            LexerAction::Channel { channel } => (5, *channel, 0),
            LexerAction::Type { token_type } => (
                6,
                usize::try_from(token_type + TOKEN_SHIFT).unwrap_or(0),
                0,
            ),
            LexerAction::Custom {
                rule_index,
                action_index,
            } => (7, *rule_index, *action_index),
        };
        out.push(tag);
        emit(&mut out, d1)?;
        emit(&mut out, d2)?;
    }

    Ok(out)
}

struct Reader<'a> {
    data: &'a [u16],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self) -> Result<u16, RecognitionError> {
        let w = self
            .data
            .get(self.pos)
            .copied()
            .ok_or(RecognitionError::IndexOutOfBounds {
                index: self.pos,
                size: self.data.len(),
            })?;
        self.pos += 1;
        Ok(w)
    }

    fn take_usize(&mut self) -> Result<usize, RecognitionError> {
        Ok(self.take()? as usize)
    }

    fn take_token(&mut self) -> Result<i32, RecognitionError> {
        Ok(i32::from(self.take()?) - TOKEN_SHIFT)
    }
}

fn malformed(what: &str) -> RecognitionError {
    RecognitionError::IllegalState(format!("malformed serialized ATN: {what}"))
}

/// Deserialize an ATN from its 16-bit code unit form.
///
/// # Errors
///
/// `UnsupportedOperation` on a version or UUID mismatch, `IndexOutOfBounds`
/// on truncated data, `IllegalState` on structural damage.
#[allow(clippy::too_many_lines)]
pub fn deserialize(data: &[u16]) -> Result<Atn, RecognitionError> {
    let mut r = Reader { data, pos: 0 };

    let version = r.take()?;
    if version != SERIALIZED_VERSION {
        return Err(RecognitionError::UnsupportedOperation(format!(
            "serialized ATN version {version}, expected {SERIALIZED_VERSION}"
        )));
    }
    let mut uuid = [0u16; 8];
    for w in &mut uuid {
        *w = r.take()?;
    }
    if uuid != SERIALIZED_UUID {
        return Err(RecognitionError::UnsupportedOperation(
            "serialized ATN UUID does not match this runtime".into(),
        ));
    }

    let grammar_kind = match r.take()? {
        0 => GrammarKind::Lexer,
        1 => GrammarKind::Parser,
        tag => return Err(malformed(&format!("grammar kind tag {tag}"))),
    };
    let max_token_type = r.take_token()?;
    let mut atn = Atn::new(grammar_kind, max_token_type);

    // Rule tables.
    let nrules = r.take_usize()?;
    for _ in 0..nrules {
        atn.rule_to_start_state.push(r.take_usize()?);
        atn.rule_to_stop_state.push(r.take_usize()?);
        if grammar_kind == GrammarKind::Lexer {
            atn.rule_to_token_type.push(r.take_token()?);
        }
    }

    // Modes.
    let nmodes = r.take_usize()?;
    for _ in 0..nmodes {
        atn.mode_to_start_state.push(r.take_usize()?);
    }

    // Interval-set pool.
    let nsets = r.take_usize()?;
    let mut sets = Vec::with_capacity(nsets);
    for _ in 0..nsets {
        let nintervals = r.take_usize()?;
        let mut set = IntervalSet::new();
        for _ in 0..nintervals {
            let start = r.take_token()?;
            let stop = r.take_token()?;
            set.add_range(start, stop);
        }
        sets.push(set);
    }

    // State table.
    let nstates = r.take_usize()?;
    for _ in 0..nstates {
        let tag = r.take()?;
        let rule_index = r.take_usize()?;
        let decision = r.take_usize()?;
        let flags = r.take()?;
        let arg = r.take_usize()?;
        let flag = flags & 0b10 != 0;
        let kind = match tag {
            0 => AtnStateKind::Basic,
            1 => AtnStateKind::RuleStart {
                stop_state: arg,
                is_left_recursive: flag,
            },
            2 => AtnStateKind::RuleStop,
            3 => AtnStateKind::BlockStart { end_state: arg },
            4 => AtnStateKind::BlockEnd { start_state: arg },
            5 => AtnStateKind::PlusBlockStart { loopback: arg },
            6 => AtnStateKind::PlusLoopback,
            7 => AtnStateKind::StarBlockStart,
            8 => AtnStateKind::StarLoopEntry {
                loopback: arg,
                precedence_decision: flag,
            },
            9 => AtnStateKind::StarLoopback,
            10 => AtnStateKind::LoopEnd { loopback: arg },
            11 => AtnStateKind::TokenStart,
            tag => return Err(malformed(&format!("state kind tag {tag}"))),
        };
        let number = atn.add_state(rule_index, kind);
        atn.state_mut(number).non_greedy = flags & 0b1 != 0;
        if decision > 0 {
            atn.state_mut(number).decision = Some(decision - 1);
        }
    }

    // Transition table, with target resolution checks.
    let ntransitions = r.take_usize()?;
    for _ in 0..ntransitions {
        let src = r.take_usize()?;
        let target = r.take_usize()?;
        let tag = r.take()?;
        let a = r.take_usize()?;
        let b = r.take_usize()?;
        let c = r.take_usize()?;
        if src >= nstates || target >= nstates {
            return Err(malformed(&format!("transition {src} -> {target} out of range")));
        }
        let kind = match tag {
            0 => TransitionKind::Epsilon {
                outermost_precedence_return: a.checked_sub(1),
            },
            1 => TransitionKind::Atom {
                label: i32::try_from(a).unwrap_or(0) - TOKEN_SHIFT,
            },
            2 => TransitionKind::Range {
                start: i32::try_from(a).unwrap_or(0) - TOKEN_SHIFT,
                stop: i32::try_from(b).unwrap_or(0) - TOKEN_SHIFT,
            },
            3 => TransitionKind::Set {
                set: sets.get(a).cloned().ok_or_else(|| malformed("set index"))?,
            },
            4 => TransitionKind::NotSet {
                set: sets.get(a).cloned().ok_or_else(|| malformed("set index"))?,
            },
            5 => TransitionKind::Wildcard,
            6 => {
                if c >= nstates {
                    return Err(malformed("rule follow state out of range"));
                }
                TransitionKind::Rule {
                    rule_index: a,
                    precedence: u32::try_from(b).unwrap_or(0),
                    follow_state: c,
                }
            }
            7 => TransitionKind::Predicate {
                rule_index: a,
                pred_index: b,
                is_ctx_dependent: c != 0,
            },
            8 => TransitionKind::Precedence {
                precedence: u32::try_from(a).unwrap_or(0),
            },
            9 => TransitionKind::Action {
                rule_index: a,
                action_index: b,
                is_ctx_dependent: c != 0,
            },
            tag => return Err(malformed(&format!("transition kind tag {tag}"))),
        };
        atn.add_transition(src, Transition::new(target, kind));
    }

    // Decision table.
    let ndecisions = r.take_usize()?;
    for _ in 0..ndecisions {
        let state = r.take_usize()?;
        if state >= nstates {
            return Err(malformed("decision state out of range"));
        }
        atn.decision_to_state.push(state);
    }

    // Lexer actions.
    let nactions = r.take_usize()?;
    for _ in 0..nactions {
        let tag = r.take()?;
        let d1 = r.take_usize()?;
        let d2 = r.take_usize()?;
        let action = match tag {
            0 => LexerAction::Skip,
            1 => LexerAction::More,
            2 => LexerAction::PopMode,
            3 => LexerAction::Mode { mode: d1 },
            4 => LexerAction::PushMode { mode: d1 },
            5 => LexerAction::Channel { channel: d1 },
            6 => LexerAction::Type {
                token_type: i32::try_from(d1).unwrap_or(0) - TOKEN_SHIFT,
            },
            7 => LexerAction::Custom {
                rule_index: d1,
                action_index: d2,
            },
            tag => return Err(malformed(&format!("lexer action tag {tag}"))),
        };
        atn.lexer_actions.push(action);
    }

    atn.link_rule_stops();
    Ok(atn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TOKEN_EOF;

    fn sample_atn() -> Atn {
        // r: A | (B | C)+ ; with a set transition and a lexer-style action.
        let mut atn = Atn::new(GrammarKind::Parser, 4);
        let start = atn.add_state(0, AtnStateKind::RuleStart {
            stop_state: 1,
            is_left_recursive: false,
        });
        let stop = atn.add_state(0, AtnStateKind::RuleStop);
        let block = atn.add_state(0, AtnStateKind::BlockStart { end_state: 3 });
        let end = atn.add_state(0, AtnStateKind::BlockEnd { start_state: block });
        let a = atn.add_state(0, AtnStateKind::Basic);
        let b = atn.add_state(0, AtnStateKind::Basic);
        atn.rule_to_start_state.push(start);
        atn.rule_to_stop_state.push(stop);
        atn.add_decision(block);
        atn.add_transition(start, Transition::epsilon(block));
        atn.add_transition(block, Transition::new(a, TransitionKind::Atom { label: 1 }));
        atn.add_transition(
            block,
            Transition::new(
                b,
                TransitionKind::Set {
                    set: [2, 3].into_iter().collect(),
                },
            ),
        );
        atn.add_transition(a, Transition::epsilon(end));
        atn.add_transition(b, Transition::epsilon(end));
        atn.add_transition(end, Transition::epsilon(stop));
        atn
    }

    #[test]
    fn test_round_trip() {
        let atn = sample_atn();
        let data = serialize(&atn).unwrap();
        let loaded = deserialize(&data).unwrap();

        assert_eq!(loaded.grammar_kind, atn.grammar_kind);
        assert_eq!(loaded.max_token_type, atn.max_token_type);
        assert_eq!(loaded.states(), atn.states());
        assert_eq!(loaded.decision_to_state, atn.decision_to_state);
        assert_eq!(loaded.rule_to_start_state, atn.rule_to_start_state);
        assert_eq!(loaded.rule_to_stop_state, atn.rule_to_stop_state);
    }

    #[test]
    fn test_round_trip_lexer_tables() {
        let mut atn = Atn::new(GrammarKind::Lexer, 2);
        let mode = atn.add_state(0, AtnStateKind::TokenStart);
        let body = atn.add_state(0, AtnStateKind::Basic);
        let stop = atn.add_state(0, AtnStateKind::RuleStop);
        atn.rule_to_start_state.push(mode);
        atn.rule_to_stop_state.push(stop);
        atn.rule_to_token_type.push(1);
        atn.mode_to_start_state.push(mode);
        atn.lexer_actions.push(LexerAction::Skip);
        atn.lexer_actions.push(LexerAction::Type { token_type: 2 });
        atn.lexer_actions.push(LexerAction::PushMode { mode: 0 });
        atn.add_transition(
            mode,
            Transition::new(body, TransitionKind::Range { start: 97, stop: 122 }),
        );
        atn.add_transition(body, Transition::epsilon(stop));

        let data = serialize(&atn).unwrap();
        let loaded = deserialize(&data).unwrap();
        assert_eq!(loaded.rule_to_token_type, atn.rule_to_token_type);
        assert_eq!(loaded.mode_to_start_state, atn.mode_to_start_state);
        assert_eq!(loaded.lexer_actions, atn.lexer_actions);
        assert_eq!(loaded.states(), atn.states());
    }

    #[test]
    fn test_eof_label_round_trips() {
        let mut atn = Atn::new(GrammarKind::Parser, 1);
        let a = atn.add_state(0, AtnStateKind::Basic);
        let b = atn.add_state(0, AtnStateKind::RuleStop);
        atn.rule_to_start_state.push(a);
        atn.rule_to_stop_state.push(b);
        atn.add_transition(a, Transition::new(b, TransitionKind::Atom { label: TOKEN_EOF }));

        let loaded = deserialize(&serialize(&atn).unwrap()).unwrap();
        assert!(loaded.state(a).transitions[0].matches_eof());
    }

    #[test]
    fn test_version_mismatch() {
        let mut data = serialize(&sample_atn()).unwrap();
        data[0] = SERIALIZED_VERSION + 1;
        assert!(matches!(
            deserialize(&data),
            Err(RecognitionError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_uuid_mismatch() {
        let mut data = serialize(&sample_atn()).unwrap();
        data[3] ^= 0xffff;
        assert!(matches!(
            deserialize(&data),
            Err(RecognitionError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_truncated_data() {
        let data = serialize(&sample_atn()).unwrap();
        assert!(matches!(
            deserialize(&data[..data.len() - 3]),
            Err(RecognitionError::IndexOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_dangling_target_rejected() {
        let mut atn = Atn::new(GrammarKind::Parser, 1);
        let a = atn.add_state(0, AtnStateKind::Basic);
        atn.add_transition(a, Transition::epsilon(7));
        let data = serialize(&atn).unwrap();
        assert!(matches!(
            deserialize(&data),
            Err(RecognitionError::IllegalState(_))
        ));
    }
}
