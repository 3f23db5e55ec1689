#[derive(Debug, Clone)]
pub enum AppEvent {
    /// The jittered reply delay for an exchange ran out. The generation
    /// identifies which exchange; the engine ignores stale ones.
    ReplyTimerElapsed { generation: u64 },
}
