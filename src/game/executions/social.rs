//! Chat, quick-chat, and emoji
//!
//! Fire-once executions whose tick performs the delivery side effect and
//! immediately deactivates. All of them run during the spawn phase so the
//! lobby stays social before combat starts.

use super::Execution;
use crate::game::world::WorldState;
use crate::game::{PlayerId, Tick};
use crate::ws::protocol::{ChatScope, GameEvent};

/// Longest accepted chat body; the rest is cut, not rejected.
const MAX_CHAT_LEN: usize = 300;

pub struct ChatExecution {
    owner: PlayerId,
    scope: ChatScope,
    body: String,
    done: bool,
}

impl ChatExecution {
    pub fn new(owner: PlayerId, scope: ChatScope, body: String) -> Self {
        Self {
            owner,
            scope,
            body,
            done: false,
        }
    }
}

impl Execution for ChatExecution {
    fn init(&mut self, world: &mut WorldState, _tick: Tick) {
        if world.player(&self.owner).is_none() || self.body.trim().is_empty() {
            self.done = true;
            return;
        }
        if self.body.len() > MAX_CHAT_LEN {
            let mut cut = MAX_CHAT_LEN;
            while !self.body.is_char_boundary(cut) {
                cut -= 1;
            }
            self.body.truncate(cut);
        }
    }

    fn tick(&mut self, world: &mut WorldState, _tick: Tick) {
        if self.done {
            return;
        }
        self.done = true;

        match &self.scope {
            ChatScope::All => {
                world.emit(GameEvent::Chat {
                    from: self.owner.clone(),
                    to: None,
                    whisper: false,
                    body: self.body.clone(),
                });
            }
            ChatScope::Direct { to } | ChatScope::Whisper { to } => {
                if world.player(to).is_none() {
                    return;
                }
                let whisper = matches!(self.scope, ChatScope::Whisper { .. });
                world.emit_to(
                    GameEvent::Chat {
                        from: self.owner.clone(),
                        to: Some(to.clone()),
                        whisper,
                        body: self.body.clone(),
                    },
                    vec![self.owner.clone(), to.clone()],
                );
            }
        }
    }

    fn is_active(&self) -> bool {
        !self.done
    }

    fn active_during_spawn_phase(&self) -> bool {
        true
    }

    fn owner(&self) -> Option<&PlayerId> {
        Some(&self.owner)
    }
}

pub struct QuickChatExecution {
    owner: PlayerId,
    key: String,
    to: Option<PlayerId>,
    done: bool,
}

impl QuickChatExecution {
    pub fn new(owner: PlayerId, key: String, to: Option<PlayerId>) -> Self {
        Self {
            owner,
            key,
            to,
            done: false,
        }
    }
}

impl Execution for QuickChatExecution {
    fn init(&mut self, world: &mut WorldState, _tick: Tick) {
        if world.player(&self.owner).is_none() || self.key.is_empty() {
            self.done = true;
        }
    }

    fn tick(&mut self, world: &mut WorldState, _tick: Tick) {
        if self.done {
            return;
        }
        self.done = true;

        world.emit(GameEvent::QuickChat {
            from: self.owner.clone(),
            key: self.key.clone(),
            to: self.to.clone(),
        });
    }

    fn is_active(&self) -> bool {
        !self.done
    }

    fn active_during_spawn_phase(&self) -> bool {
        true
    }

    fn owner(&self) -> Option<&PlayerId> {
        Some(&self.owner)
    }
}

pub struct EmojiExecution {
    owner: PlayerId,
    emoji: String,
    to: Option<PlayerId>,
    done: bool,
}

impl EmojiExecution {
    pub fn new(owner: PlayerId, emoji: String, to: Option<PlayerId>) -> Self {
        Self {
            owner,
            emoji,
            to,
            done: false,
        }
    }
}

impl Execution for EmojiExecution {
    fn init(&mut self, world: &mut WorldState, _tick: Tick) {
        if world.player(&self.owner).is_none() || self.emoji.is_empty() {
            self.done = true;
        }
    }

    fn tick(&mut self, world: &mut WorldState, _tick: Tick) {
        if self.done {
            return;
        }
        self.done = true;

        let event = GameEvent::Emoji {
            from: self.owner.clone(),
            emoji: self.emoji.clone(),
            to: self.to.clone(),
        };
        match &self.to {
            Some(to) => world.emit_to(event, vec![self.owner.clone(), to.clone()]),
            None => world.emit(event),
        }
    }

    fn is_active(&self) -> bool {
        !self.done
    }

    fn active_during_spawn_phase(&self) -> bool {
        true
    }

    fn owner(&self) -> Option<&PlayerId> {
        Some(&self.owner)
    }
}
