//! Vocabulary, subword hashing and line tokenization.
//!
//! Words and labels live in one entry table fronted by a fixed-capacity
//! open-addressing hash table. Subword ids are bucket-hashed character
//! n-grams in `[nwords, nwords + bucket)`. Korean tokens are decomposed to
//! jamo before they reach the hash function, so the n-gram machinery sees
//! 초/중/종성 plus the `ᴥ` syllable terminator instead of opaque syllables.

use std::borrow::Cow;
use std::collections::HashMap;
use std::io::{BufRead, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use log::info;
use rand::rngs::StdRng;
use rand::Rng;

use crate::args::{Args, ModelKind};
use crate::error::JamoTextErrorKind;
use crate::io::{
    read_cstring, read_i32, read_i64, read_u8, write_cstring, write_i32, write_i64, write_u8,
};
use crate::jamo;
use crate::JamoTextResult;

pub const MAX_VOCAB_SIZE: usize = 30_000_000;
pub const MAX_LINE_SIZE: i32 = 1024;

pub const EOS: &str = "</s>";
pub const BOW: char = '<';
pub const EOW: char = '>';

const WORD_NGRAM_SEED: u64 = 116_049_371;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Word,
    Label,
}

impl EntryKind {
    fn to_wire(self) -> u8 {
        match self {
            EntryKind::Word => 0,
            EntryKind::Label => 1,
        }
    }

    fn from_wire(value: u8) -> JamoTextResult<Self> {
        match value {
            0 => Ok(EntryKind::Word),
            1 => Ok(EntryKind::Label),
            _ => Err(JamoTextErrorKind::Deserialize
                .with_error(anyhow::anyhow!("Unknown entry type: {}", value))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub word: String,
    pub count: i64,
    pub kind: EntryKind,
    pub subwords: Vec<i32>,
}

pub struct Dictionary {
    args: Arc<Args>,
    words: Vec<Entry>,
    word2int: Vec<i32>,
    pdiscard: Vec<f32>,
    size: i32,
    nwords: i32,
    nlabels: i32,
    ntokens: i64,
    pruneidx: HashMap<i32, i32>,
    pruneidx_size: i64,
}

/// Reads one whitespace-delimited token. A newline that terminates a token
/// is left in the stream so the next call emits it as `</s>`.
fn read_word<R: BufRead>(reader: &mut R, token: &mut Vec<u8>) -> JamoTextResult<bool> {
    token.clear();
    loop {
        let byte = {
            let buf = reader
                .fill_buf()
                .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))?;
            if buf.is_empty() {
                return Ok(!token.is_empty());
            }
            buf[0]
        };
        match byte {
            b' ' | b'\t' | b'\r' | 0x0B | 0x0C | 0x00 => {
                reader.consume(1);
                if !token.is_empty() {
                    return Ok(true);
                }
            }
            b'\n' => {
                if token.is_empty() {
                    reader.consume(1);
                    token.extend_from_slice(EOS.as_bytes());
                }
                return Ok(true);
            }
            _ => {
                token.push(byte);
                reader.consume(1);
            }
        }
    }
}

impl Dictionary {
    pub fn new(args: Arc<Args>) -> Self {
        Dictionary {
            args,
            words: Vec::new(),
            word2int: vec![-1; MAX_VOCAB_SIZE],
            pdiscard: Vec::new(),
            size: 0,
            nwords: 0,
            nlabels: 0,
            ntokens: 0,
            pruneidx: HashMap::new(),
            pruneidx_size: -1,
        }
    }

    /// FNV-1a over the UTF-8 bytes. Bytes are sign-extended before the xor,
    /// which matters for every byte >= 0x80.
    pub fn hash(word: &str) -> u32 {
        let mut h: u32 = 2_166_136_261;
        for &b in word.as_bytes() {
            h ^= (b as i8) as u32;
            h = h.wrapping_mul(16_777_619);
        }
        h
    }

    pub fn nwords(&self) -> i32 {
        self.nwords
    }

    pub fn nlabels(&self) -> i32 {
        self.nlabels
    }

    pub fn size(&self) -> i32 {
        self.size
    }

    pub fn ntokens(&self) -> i64 {
        self.ntokens
    }

    pub fn is_pruned(&self) -> bool {
        self.pruneidx_size >= 0
    }

    pub fn word(&self, id: i32) -> &str {
        &self.words[id as usize].word
    }

    pub fn label(&self, lid: i32) -> &str {
        &self.words[(lid + self.nwords) as usize].word
    }

    pub fn entry(&self, id: i32) -> &Entry {
        &self.words[id as usize]
    }

    pub fn counts(&self, kind: EntryKind) -> Vec<i64> {
        self.words
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.count)
            .collect()
    }

    /// Decomposes Korean tokens. Labels keep their surface form so class
    /// names stay what the user wrote.
    pub fn normalize<'a>(&self, token: &'a str) -> Cow<'a, str> {
        if token.starts_with(&self.args.label) || !jamo::contains_hangul(token) {
            Cow::Borrowed(token)
        } else {
            Cow::Owned(jamo::decompose(token))
        }
    }

    fn entry_kind_of(&self, token: &str) -> EntryKind {
        if token.starts_with(&self.args.label) {
            EntryKind::Label
        } else {
            EntryKind::Word
        }
    }

    fn find_slot(&self, word: &str) -> usize {
        self.find_slot_hashed(word, Self::hash(word))
    }

    fn find_slot_hashed(&self, word: &str, hash: u32) -> usize {
        let mut slot = hash as usize % MAX_VOCAB_SIZE;
        while self.word2int[slot] != -1 && self.words[self.word2int[slot] as usize].word != word {
            slot = (slot + 1) % MAX_VOCAB_SIZE;
        }
        slot
    }

    /// Id of a normalized token, -1 when out of vocabulary.
    fn get_id(&self, word: &str) -> i32 {
        self.word2int[self.find_slot(word)]
    }

    /// Id of a raw surface token.
    pub fn word_id(&self, word: &str) -> i32 {
        self.get_id(&self.normalize(word))
    }

    fn add(&mut self, word: &str) {
        let slot = self.find_slot(word);
        self.ntokens += 1;
        if self.word2int[slot] == -1 {
            self.words.push(Entry {
                word: word.to_string(),
                count: 1,
                kind: self.entry_kind_of(word),
                subwords: Vec::new(),
            });
            self.word2int[slot] = self.size;
            self.size += 1;
        } else {
            self.words[self.word2int[slot] as usize].count += 1;
        }
    }

    /// Builds the vocabulary from a token stream, thresholds it and prepares
    /// the discard table and subword lists.
    pub fn read_from_file<R: BufRead>(&mut self, reader: &mut R) -> JamoTextResult<()> {
        let mut min_threshold: i64 = 1;
        let mut token_bytes = Vec::new();
        while read_word(reader, &mut token_bytes)? {
            let token = String::from_utf8_lossy(&token_bytes);
            let token = self.normalize(&token).into_owned();
            self.add(&token);
            if self.ntokens % 10_000_000 == 0 && self.args.verbose > 1 {
                info!("Read {}M words", self.ntokens / 1_000_000);
            }
            if self.size as f64 > 0.75 * MAX_VOCAB_SIZE as f64 {
                min_threshold += 1;
                self.threshold(min_threshold, min_threshold);
            }
        }
        self.threshold(self.args.min_count as i64, self.args.min_count_label as i64);
        self.init_table_discard();
        self.init_ngrams();
        if self.args.verbose > 0 {
            info!(
                "Read {}M words, number of words: {}, number of labels: {}",
                self.ntokens / 1_000_000,
                self.nwords,
                self.nlabels
            );
        }
        if self.size == 0 {
            return Err(JamoTextErrorKind::Vocabulary.with_error(anyhow::anyhow!(
                "Empty vocabulary. Try a smaller -minCount value."
            )));
        }
        Ok(())
    }

    /// Sorts by (type, count desc), drops entries below the per-type
    /// threshold and rebuilds the hash table. Words end up before labels.
    pub fn threshold(&mut self, t: i64, tl: i64) {
        self.words.sort_by(|a, b| {
            (a.kind as u8)
                .cmp(&(b.kind as u8))
                .then(b.count.cmp(&a.count))
        });
        self.words.retain(|e| match e.kind {
            EntryKind::Word => e.count >= t,
            EntryKind::Label => e.count >= tl,
        });
        self.words.shrink_to_fit();
        self.size = 0;
        self.nwords = 0;
        self.nlabels = 0;
        self.word2int.fill(-1);
        for i in 0..self.words.len() {
            let slot = self.find_slot_free(&self.words[i].word);
            self.word2int[slot] = self.size;
            self.size += 1;
            match self.words[i].kind {
                EntryKind::Word => self.nwords += 1,
                EntryKind::Label => self.nlabels += 1,
            }
        }
    }

    // During a rebuild entries are re-inserted into an all-empty table, so
    // probing only has to find the first free slot.
    fn find_slot_free(&self, word: &str) -> usize {
        let mut slot = Self::hash(word) as usize % MAX_VOCAB_SIZE;
        while self.word2int[slot] != -1 && self.words[self.word2int[slot] as usize].word != word {
            slot = (slot + 1) % MAX_VOCAB_SIZE;
        }
        slot
    }

    fn init_table_discard(&mut self) {
        self.pdiscard.clear();
        self.pdiscard.reserve(self.size as usize);
        let t = self.args.t as f32;
        for entry in &self.words {
            let f = entry.count as f32 / self.ntokens as f32;
            self.pdiscard.push((t / f).sqrt() + t / f);
        }
    }

    pub fn pdiscard(&self, id: i32) -> f32 {
        self.pdiscard[id as usize]
    }

    fn discard(&self, id: i32, rand: f32) -> bool {
        if self.args.model == ModelKind::Supervised {
            return false;
        }
        rand > self.pdiscard[id as usize]
    }

    fn init_ngrams(&mut self) {
        for i in 0..self.size as usize {
            let padded = format!("{}{}{}", BOW, self.words[i].word, EOW);
            let mut subwords = vec![i as i32];
            if self.words[i].word != EOS {
                self.compute_subwords(&padded, &mut subwords, None);
            }
            self.words[i].subwords = subwords;
        }
    }

    /// Subword ids of an entry. The first id is the entry itself.
    pub fn subwords_of(&self, id: i32) -> &[i32] {
        &self.words[id as usize].subwords
    }

    /// Subword ids of a raw token. In-vocabulary tokens reuse the
    /// precomputed list, everything else is hashed on the fly.
    pub fn subwords(&self, word: &str) -> Vec<i32> {
        let word = self.normalize(word);
        let id = self.get_id(&word);
        if id >= 0 {
            return self.words[id as usize].subwords.clone();
        }
        let mut ngrams = Vec::new();
        if word != EOS {
            let padded = format!("{}{}{}", BOW, word, EOW);
            self.compute_subwords(&padded, &mut ngrams, None);
        }
        ngrams
    }

    /// Subword ids together with their n-gram strings, for diagnostics.
    pub fn subwords_with_strings(&self, word: &str) -> (Vec<i32>, Vec<String>) {
        let word = self.normalize(word);
        let mut ngrams = Vec::new();
        let mut substrings = Vec::new();
        let id = self.get_id(&word);
        if id >= 0 {
            ngrams.push(id);
            substrings.push(self.words[id as usize].word.clone());
        }
        if word != EOS {
            let padded = format!("{}{}{}", BOW, word, EOW);
            self.compute_subwords(&padded, &mut ngrams, Some(&mut substrings));
        }
        (ngrams, substrings)
    }

    fn compute_subwords(
        &self,
        padded: &str,
        ngrams: &mut Vec<i32>,
        substrings: Option<&mut Vec<String>>,
    ) {
        self.compute_char_ngrams(padded, ngrams, substrings);

        #[cfg(any(
            feature = "consonant-ngrams",
            feature = "syllable-ablation",
            feature = "syllable-combination"
        ))]
        {
            use std::collections::HashSet;

            let inner = &padded[1..padded.len() - 1];
            let mut seen: HashSet<i32> = ngrams.iter().copied().collect();
            let mut variants: Vec<String> = Vec::new();
            #[cfg(feature = "consonant-ngrams")]
            variants.extend(consonant_variant(inner));
            #[cfg(feature = "syllable-ablation")]
            variants.extend(vowel_ablation_variants(inner));
            #[cfg(feature = "syllable-combination")]
            variants.extend(syllable_drop_variants(inner));
            for variant in variants {
                let padded = format!("{}{}{}", BOW, variant, EOW);
                let mut extra = Vec::new();
                self.compute_char_ngrams(&padded, &mut extra, None);
                for id in extra {
                    if seen.insert(id) {
                        ngrams.push(id);
                    }
                }
            }
        }
    }

    // Byte n-grams over whole code points. `n` counts code points;
    // continuation bytes ride along with their lead byte. 1-grams touching
    // either padding bracket are skipped.
    fn compute_char_ngrams(
        &self,
        padded: &str,
        ngrams: &mut Vec<i32>,
        mut substrings: Option<&mut Vec<String>>,
    ) {
        if self.args.bucket == 0 {
            return;
        }
        let bytes = padded.as_bytes();
        for i in 0..bytes.len() {
            if (bytes[i] & 0xC0) == 0x80 {
                continue;
            }
            let mut j = i;
            let mut n = 1;
            while j < bytes.len() && n <= self.args.maxn {
                j += 1;
                while j < bytes.len() && (bytes[j] & 0xC0) == 0x80 {
                    j += 1;
                }
                if n >= self.args.minn && !(n == 1 && (i == 0 || j == bytes.len())) {
                    let ngram = &padded[i..j];
                    let h = (Self::hash(ngram) % self.args.bucket as u32) as i32;
                    match substrings.as_mut() {
                        Some(subs) => {
                            ngrams.push(self.nwords + h);
                            subs.push(ngram.to_string());
                        }
                        None => self.push_hash(ngrams, h),
                    }
                }
                n += 1;
            }
        }
    }

    fn push_hash(&self, hashes: &mut Vec<i32>, mut id: i32) {
        if self.pruneidx_size == 0 || id < 0 {
            return;
        }
        if self.pruneidx_size > 0 {
            match self.pruneidx.get(&id) {
                Some(&mapped) => id = mapped,
                None => return,
            }
        }
        hashes.push(self.nwords + id);
    }

    fn add_word_ngrams(&self, line: &mut Vec<i32>, hashes: &[u32], n: i32) {
        if self.args.bucket == 0 {
            return;
        }
        for i in 0..hashes.len() {
            let mut h = hashes[i] as u64;
            for j in (i + 1)..hashes.len().min(i + n as usize) {
                h = h.wrapping_mul(WORD_NGRAM_SEED).wrapping_add(hashes[j] as u64);
                self.push_hash(line, (h % self.args.bucket as u64) as i32);
            }
        }
    }

    fn add_subwords(&self, line: &mut Vec<i32>, token: &str, wid: i32) {
        if wid < 0 {
            if token != EOS {
                let padded = format!("{}{}{}", BOW, token, EOW);
                self.compute_subwords(&padded, line, None);
            }
        } else if self.args.maxn <= 0 {
            line.push(wid);
        } else {
            line.extend_from_slice(&self.words[wid as usize].subwords);
        }
    }

    fn reset_if_eof<R: BufRead + Seek>(&self, reader: &mut R) -> JamoTextResult<()> {
        let at_eof = reader
            .fill_buf()
            .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))?
            .is_empty();
        if at_eof {
            reader
                .seek(SeekFrom::Start(0))
                .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))?;
        }
        Ok(())
    }

    /// Training line reader for skipgram and cbow. Applies the discard table
    /// and stops after `MAX_LINE_SIZE` tokens or at end of sentence. Wraps
    /// around at end of file.
    pub fn get_line<R: BufRead + Seek>(
        &self,
        reader: &mut R,
        words: &mut Vec<i32>,
        rng: &mut StdRng,
    ) -> JamoTextResult<i32> {
        self.reset_if_eof(reader)?;
        words.clear();
        let mut ntokens = 0;
        let mut token_bytes = Vec::new();
        while read_word(reader, &mut token_bytes)? {
            let raw = String::from_utf8_lossy(&token_bytes);
            let token = self.normalize(&raw);
            let wid = self.get_id(&token);
            if wid < 0 {
                continue;
            }
            ntokens += 1;
            if self.words[wid as usize].kind == EntryKind::Word
                && !self.discard(wid, rng.gen::<f32>())
            {
                words.push(wid);
            }
            if ntokens > MAX_LINE_SIZE || token == EOS {
                break;
            }
        }
        Ok(ntokens)
    }

    /// Labeled line reader for supervised training, testing and prediction.
    /// Words expand into their subwords, labels collapse to label ids and
    /// word n-grams are mixed in at the end.
    pub fn get_line_labeled<R: BufRead + Seek>(
        &self,
        reader: &mut R,
        words: &mut Vec<i32>,
        labels: &mut Vec<i32>,
    ) -> JamoTextResult<i32> {
        self.reset_if_eof(reader)?;
        words.clear();
        labels.clear();
        let mut word_hashes: Vec<u32> = Vec::new();
        let mut ntokens = 0;
        let mut token_bytes = Vec::new();
        while read_word(reader, &mut token_bytes)? {
            let raw = String::from_utf8_lossy(&token_bytes);
            let token = self.normalize(&raw);
            let hash = Self::hash(&token);
            let wid = self.word2int[self.find_slot_hashed(&token, hash)];
            let kind = if wid < 0 {
                self.entry_kind_of(&token)
            } else {
                self.words[wid as usize].kind
            };
            ntokens += 1;
            match kind {
                EntryKind::Word => {
                    self.add_subwords(words, &token, wid);
                    word_hashes.push(hash);
                }
                EntryKind::Label => {
                    if wid >= 0 {
                        labels.push(wid - self.nwords);
                    }
                }
            }
            if token == EOS {
                break;
            }
        }
        self.add_word_ngrams(words, &word_hashes, self.args.word_ngrams);
        Ok(ntokens)
    }

    /// Merges words from a pretrained vector file into the vocabulary and
    /// rebuilds the derived tables. Every merged word survives the
    /// rethreshold.
    pub fn absorb_pretrained<I: IntoIterator<Item = String>>(&mut self, words: I) {
        for word in words {
            let word = self.normalize(&word).into_owned();
            self.add(&word);
        }
        self.threshold(1, 0);
        self.init_table_discard();
        self.init_ngrams();
    }

    /// Keeps the listed input rows and remaps surviving n-gram buckets to
    /// their compact indices. Labels always survive.
    pub fn prune(&mut self, idx: &mut Vec<i32>) {
        let mut words: Vec<i32> = Vec::new();
        let mut ngrams: Vec<i32> = Vec::new();
        for &id in idx.iter() {
            if id < self.nwords {
                words.push(id);
            } else {
                ngrams.push(id);
            }
        }
        words.sort_unstable();
        idx.clear();
        idx.extend_from_slice(&words);

        self.pruneidx.clear();
        if !ngrams.is_empty() {
            for (j, &ngram) in ngrams.iter().enumerate() {
                self.pruneidx.insert(ngram - self.nwords, j as i32);
            }
            idx.extend_from_slice(&ngrams);
        }
        self.pruneidx_size = self.pruneidx.len() as i64;

        self.word2int.fill(-1);
        let mut j = 0usize;
        for i in 0..self.words.len() {
            if self.words[i].kind == EntryKind::Label
                || (j < words.len() && words[j] == i as i32)
            {
                let entry = self.words[i].clone();
                self.words[j] = entry;
                let slot = self.find_slot_free(&self.words[j].word);
                self.word2int[slot] = j as i32;
                j += 1;
            }
        }
        self.nwords = words.len() as i32;
        self.size = self.nwords + self.nlabels;
        self.words.truncate(self.size as usize);
        self.init_ngrams();
    }

    pub fn save<W: Write>(&self, writer: &mut W) -> JamoTextResult<()> {
        write_i32(writer, self.size)?;
        write_i32(writer, self.nwords)?;
        write_i32(writer, self.nlabels)?;
        write_i64(writer, self.ntokens)?;
        write_i64(writer, self.pruneidx_size)?;
        for entry in &self.words {
            write_cstring(writer, &entry.word)?;
            write_i64(writer, entry.count)?;
            write_u8(writer, entry.kind.to_wire())?;
        }
        let mut pairs: Vec<(i32, i32)> = self.pruneidx.iter().map(|(&k, &v)| (k, v)).collect();
        pairs.sort_unstable();
        for (key, value) in pairs {
            write_i32(writer, key)?;
            write_i32(writer, value)?;
        }
        Ok(())
    }

    pub fn load<R: Read>(args: Arc<Args>, reader: &mut R) -> JamoTextResult<Dictionary> {
        let size = read_i32(reader)?;
        let nwords = read_i32(reader)?;
        let nlabels = read_i32(reader)?;
        let ntokens = read_i64(reader)?;
        let pruneidx_size = read_i64(reader)?;
        if size < 0 || nwords < 0 || nlabels < 0 || nwords + nlabels != size {
            return Err(JamoTextErrorKind::Deserialize.with_error(anyhow::anyhow!(
                "Invalid dictionary header: size={} nwords={} nlabels={}",
                size,
                nwords,
                nlabels
            )));
        }
        let mut dict = Dictionary::new(args);
        dict.size = size;
        dict.nwords = nwords;
        dict.nlabels = nlabels;
        dict.ntokens = ntokens;
        dict.pruneidx_size = pruneidx_size;
        dict.words.reserve(size as usize);
        for _ in 0..size {
            let word = read_cstring(reader)?;
            let count = read_i64(reader)?;
            let kind = EntryKind::from_wire(read_u8(reader)?)?;
            dict.words.push(Entry {
                word,
                count,
                kind,
                subwords: Vec::new(),
            });
        }
        for _ in 0..pruneidx_size.max(0) {
            let key = read_i32(reader)?;
            let value = read_i32(reader)?;
            dict.pruneidx.insert(key, value);
        }
        for i in 0..dict.words.len() {
            let slot = dict.find_slot_free(&dict.words[i].word);
            dict.word2int[slot] = i as i32;
        }
        dict.init_table_discard();
        dict.init_ngrams();
        Ok(dict)
    }
}

#[cfg(any(feature = "consonant-ngrams", test))]
/// Consonant skeleton of a decomposed word, one of the experimental Korean
/// subword variants.
pub(crate) fn consonant_variant(inner: &str) -> Option<String> {
    let variant: String = inner.chars().filter(|&c| jamo::is_jamo_consonant(c)).collect();
    if variant.is_empty() || variant == inner {
        None
    } else {
        Some(variant)
    }
}

#[cfg(any(feature = "syllable-ablation", test))]
/// One variant per syllable, with that syllable's vowels removed.
pub(crate) fn vowel_ablation_variants(inner: &str) -> Vec<String> {
    let group_count = inner
        .chars()
        .filter(|&c| c == jamo::SYLLABLE_TERMINATOR)
        .count();
    let mut variants = Vec::new();
    for target in 0..group_count {
        let mut group = 0usize;
        let mut variant = String::with_capacity(inner.len());
        for ch in inner.chars() {
            if ch == jamo::SYLLABLE_TERMINATOR {
                variant.push(ch);
                group += 1;
            } else if group == target && jamo::is_jamo_vowel(ch) {
                continue;
            } else {
                variant.push(ch);
            }
        }
        if variant != inner {
            variants.push(variant);
        }
    }
    variants
}

#[cfg(any(feature = "syllable-combination", test))]
/// One variant per syllable, with the whole syllable removed.
pub(crate) fn syllable_drop_variants(inner: &str) -> Vec<String> {
    let group_count = inner
        .chars()
        .filter(|&c| c == jamo::SYLLABLE_TERMINATOR)
        .count();
    let mut variants = Vec::new();
    for target in 0..group_count {
        let mut group = 0usize;
        let mut variant = String::with_capacity(inner.len());
        for ch in inner.chars() {
            let in_target = group == target;
            if ch == jamo::SYLLABLE_TERMINATOR {
                group += 1;
                if in_target {
                    continue;
                }
            }
            if !in_target {
                variant.push(ch);
            }
        }
        if !variant.is_empty() && variant != inner {
            variants.push(variant);
        }
    }
    variants
}
