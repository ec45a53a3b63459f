pub mod bptt;
pub mod corpus;

pub use bptt::{
    BpttBatcher, BpttSchedule, MIN_VARIABLE_WINDOW, SHORT_WINDOW_PROB, SequenceBatch, TokenStream,
    WINDOW_LEN_STD, Window, WindowPlanner,
};
pub use corpus::{Corpus, Dictionary, EOS_TOKEN, UNK_TOKEN};
