//! Symbol names of every table the compiler emits

/// Label naming for one compile, all names share the configured prefix
#[derive(Debug, Clone)]
pub struct Labels {
    prefix: String,
}

impl Labels {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    pub fn header(&self) -> String {
        format!("{}music_data", self.prefix)
    }

    pub fn instruments(&self) -> String {
        format!("{}instruments", self.prefix)
    }

    pub fn extended_instruments(&self) -> String {
        format!("{}extended_instruments", self.prefix)
    }

    pub fn sample_table(&self) -> String {
        format!("{}samples", self.prefix)
    }

    pub fn envelope(&self, index: usize) -> String {
        format!("{}env{}", self.prefix, index)
    }

    pub fn groove(&self, index: usize) -> String {
        format!("{}groove{}", self.prefix, index)
    }

    pub fn fds_wave(&self, index: usize) -> String {
        format!("{}fds_wave{}", self.prefix, index)
    }

    pub fn fds_mod(&self, index: usize) -> String {
        format!("{}fds_mod{}", self.prefix, index)
    }

    pub fn n163_wave(&self, index: usize) -> String {
        format!("{}n163_wave{}", self.prefix, index)
    }

    pub fn dpcm_sample(&self, index: usize) -> String {
        format!("{}dpcm{}", self.prefix, index)
    }

    pub fn song(&self, song: usize) -> String {
        format!("{}song{}", self.prefix, song)
    }

    pub fn stream(&self, song: usize, channel: &str) -> String {
        format!("{}song{}_{}", self.prefix, song, channel)
    }

    pub fn stream_loop(&self, song: usize, channel: &str) -> String {
        format!("{}song{}_{}_loop", self.prefix, song, channel)
    }

    /// Target of a back-reference at a token offset of a stream
    pub fn stream_ref(&self, song: usize, channel: &str, offset: usize) -> String {
        format!("{}song{}_{}_ref{}", self.prefix, song, channel, offset)
    }
}

impl Default for Labels {
    fn default() -> Self {
        Self::new("")
    }
}
