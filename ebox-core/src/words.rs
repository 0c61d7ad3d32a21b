//! Human-verification word list for recovery challenges.
//!
//! Four words are derived deterministically from a challenge id and nonce
//! and displayed on both ends of a recovery exchange, so the two operators
//! can verify over a low-bandwidth channel (a phone call) that they are
//! looking at the same challenge.

use sha2::{Digest, Sha256};

use crate::format::WORD_COUNT;

/// Fixed 256-entry word list indexed by a single byte.
static WORDS: [&str; 256] = [
    "acorn", "alloy", "amber", "anchor", "anvil", "apron", "arrow", "aspen",
    "atlas", "attic", "autumn", "badge", "bamboo", "banjo", "barley", "basil",
    "beacon", "birch", "bison", "blaze", "bloom", "bolt", "bonnet", "breeze",
    "brick", "bridge", "bronze", "brook", "bugle", "butler", "cabin", "cactus",
    "camel", "candle", "canoe", "canyon", "cargo", "carol", "cedar", "cello",
    "chalk", "charm", "cherry", "chess", "chime", "cider", "cinder", "citron",
    "clover", "cobalt", "comet", "copper", "coral", "cotton", "cove", "crane",
    "crater", "creek", "cricket", "crystal", "cumin", "curtain", "cypress", "daisy",
    "dapple", "decoy", "delta", "denim", "depot", "dewdrop", "dingo", "dome",
    "donkey", "drift", "drum", "dune", "dusk", "eagle", "easel", "echo",
    "eclair", "elbow", "elder", "ember", "emblem", "engine", "envoy", "ermine",
    "fable", "falcon", "fawn", "fennel", "fern", "ferry", "fiddle", "finch",
    "fjord", "flint", "flora", "flute", "foam", "forge", "fossil", "fox",
    "frost", "gable", "galley", "garnet", "gecko", "geyser", "ginger", "glacier",
    "glade", "glen", "globe", "goose", "gourd", "granite", "grape", "gravel",
    "grotto", "grove", "gull", "gusto", "halo", "harbor", "harp", "hazel",
    "heron", "hickory", "hollow", "honey", "husk", "ibis", "icicle", "indigo",
    "ingot", "iris", "ivory", "jade", "jasper", "jetty", "jigsaw", "jovial",
    "juniper", "kayak", "kelp", "kettle", "kiosk", "kite", "knoll", "lagoon",
    "lantern", "larch", "lark", "latch", "laurel", "ledge", "lemon", "lilac",
    "linen", "lobster", "locket", "lotus", "lunar", "lyric", "magnet", "mango",
    "maple", "marble", "meadow", "melon", "mesa", "mint", "mirror", "mosaic",
    "moss", "mural", "musket", "nectar", "nickel", "north", "nugget", "nutmeg",
    "oasis", "ocean", "olive", "onyx", "opal", "orbit", "orchid", "otter",
    "owl", "oxbow", "oyster", "paddle", "pagoda", "palm", "panda", "pebble",
    "pecan", "pepper", "pigeon", "pine", "pixel", "plank", "plum", "pond",
    "poplar", "prairie", "prism", "pumice", "quail", "quartz", "quill", "quiver",
    "raft", "raven", "reed", "ridge", "ripple", "river", "robin", "rocket",
    "rudder", "saddle", "saffron", "sage", "salmon", "sandal", "sapphire", "satchel",
    "scarab", "schooner", "sepia", "sierra", "silver", "sketch", "sleigh", "spruce",
    "squall", "stable", "stork", "summit", "sundial", "tangent", "teapot", "thicket",
    "tiger", "timber", "topaz", "trellis", "tulip", "tundra", "umber", "velvet",
];

/// Returns the verification word for a single byte index.
#[must_use]
pub fn word(index: u8) -> &'static str {
    WORDS[usize::from(index)]
}

/// Derives the four verification byte indices for a challenge.
///
/// The indices are the first four bytes of SHA-256(id ‖ nonce).
#[must_use]
pub fn verification_indices(id: &[u8], nonce: &[u8]) -> [u8; WORD_COUNT] {
    let mut hasher = Sha256::new();
    hasher.update(id);
    hasher.update(nonce);
    let digest = hasher.finalize();
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Derives the four verification words for a challenge.
#[must_use]
pub fn verification_words(id: &[u8], nonce: &[u8]) -> [&'static str; WORD_COUNT] {
    let indices = verification_indices(id, nonce);
    indices.map(word)
}
