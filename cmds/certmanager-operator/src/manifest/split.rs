//! Splitting of multi-document YAML streams.

const YAML_SEPARATOR: &[u8] = b"\n---";

/// A single document cut out of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Document<'a> {
	/// Byte offset of the document start within the stream.
	pub offset: usize,
	pub bytes: &'a [u8],
}

/// Split a YAML stream into documents.
///
/// A separator is `\n---` followed by the rest of that line, so `--- # comment` still
/// separates. The last chunk is returned even without a terminating separator, and
/// a separator at the very end of the stream does not produce a trailing empty document.
pub fn split_documents(data: &[u8]) -> Vec<Document<'_>> {
	let mut documents = Vec::new();
	let mut start = 0;

	while start < data.len() {
		let rest = &data[start..];
		let Some(i) = find(rest, YAML_SEPARATOR) else {
			documents.push(Document {
				offset: start,
				bytes: rest,
			});
			break;
		};

		documents.push(Document {
			offset: start,
			bytes: &rest[..i],
		});

		let after = &rest[i + YAML_SEPARATOR.len()..];
		match after.iter().position(|&b| b == b'\n') {
			Some(j) => start += i + YAML_SEPARATOR.len() + j + 1,
			// separator line runs to end of input
			None => break,
		}
	}

	documents
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
	haystack
		.windows(needle.len())
		.position(|window| window == needle)
}

/// Whether a document holds nothing but whitespace, comments and `---` marker lines.
///
/// A stream that opens with `---` keeps that marker in its first document, so an
/// empty leading template (as rendered by Helm) looks like `---\n# Source: ...`.
pub fn is_blank(document: &[u8]) -> bool {
	document.split(|&b| b == b'\n').all(|line| {
		let line = line.trim_ascii();
		line.is_empty() || line.starts_with(b"#") || line.starts_with(b"---")
	})
}
