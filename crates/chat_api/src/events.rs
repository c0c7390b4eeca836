/// Logical unit produced by [`crate::FrameDecoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// Text fragment to append to the reply, in decode order.
    TokenDelta(String),
    /// End of the reply body. Always the last frame of a decode run.
    Terminal,
}

impl StreamFrame {
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::TokenDelta(text) => Some(text.as_str()),
            Self::Terminal => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal)
    }
}

#[cfg(test)]
mod tests {
    use super::StreamFrame;

    #[test]
    fn token_accessor_only_matches_deltas() {
        assert_eq!(StreamFrame::TokenDelta("hi".to_owned()).token(), Some("hi"));
        assert_eq!(StreamFrame::Terminal.token(), None);
        assert!(StreamFrame::Terminal.is_terminal());
    }
}
