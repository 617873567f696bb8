//! SDP codec preference rewrite
//!
//! Moves a codec's payload type to the front of the video media line so the
//! ingest server picks it during answer generation. The rewrite is a pure text
//! transform over the description's lines; line endings are preserved and a
//! description that needs no change is returned untouched.

use std::borrow::Cow;

/// One line of a session description, split from its line terminator
#[derive(Debug, Clone, Copy)]
struct SdpLine<'a> {
    content: &'a str,
    ending: &'a str,
}

fn split_lines(sdp: &str) -> Vec<SdpLine<'_>> {
    sdp.split_inclusive('\n')
        .map(|raw| {
            let content = raw.trim_end_matches(['\r', '\n']);
            SdpLine {
                content,
                ending: &raw[content.len()..],
            }
        })
        .collect()
}

/// Payload type mapped to `codec` by an `a=rtpmap` line, if this is one
fn rtpmap_payload_type<'a>(line: &'a str, codec: &str) -> Option<&'a str> {
    let rest = line.strip_prefix("a=rtpmap:")?;
    let (pt, encoding) = rest.split_once(' ')?;
    let name = encoding.split('/').next()?;
    name.trim().eq_ignore_ascii_case(codec).then_some(pt.trim())
}

/// Reorder the formats of an `m=` line so `pt` comes first.
///
/// Returns `None` if the line is malformed or does not list `pt`.
fn reorder_media_line(line: &str, pt: &str) -> Option<String> {
    let parts: Vec<&str> = line.split(' ').collect();
    if parts.len() < 4 || !parts[3..].contains(&pt) {
        return None;
    }

    let mut reordered: Vec<&str> = Vec::with_capacity(parts.len());
    reordered.extend_from_slice(&parts[..3]);
    reordered.push(pt);
    reordered.extend(parts[3..].iter().copied().filter(|p| *p != pt));
    Some(reordered.join(" "))
}

/// Put `codec`'s payload type first on the first video media line.
pub fn prefer_codec<'a>(sdp: &'a str, codec: &str) -> Cow<'a, str> {
    let lines = split_lines(sdp);

    let Some(m_index) = lines.iter().position(|l| l.content.starts_with("m=video")) else {
        return Cow::Borrowed(sdp);
    };

    // The mapping must come from the video section itself
    let section_end = lines[m_index + 1..]
        .iter()
        .position(|l| l.content.starts_with("m="))
        .map(|offset| m_index + 1 + offset)
        .unwrap_or(lines.len());

    let Some(pt) = lines[m_index + 1..section_end]
        .iter()
        .find_map(|l| rtpmap_payload_type(l.content, codec))
    else {
        return Cow::Borrowed(sdp);
    };

    let Some(new_m_line) = reorder_media_line(lines[m_index].content, pt) else {
        return Cow::Borrowed(sdp);
    };
    if new_m_line == lines[m_index].content {
        return Cow::Borrowed(sdp);
    }

    let mut out = String::with_capacity(sdp.len());
    for (i, line) in lines.iter().enumerate() {
        if i == m_index {
            out.push_str(&new_m_line);
        } else {
            out.push_str(line.content);
        }
        out.push_str(line.ending);
    }
    Cow::Owned(out)
}

/// Put the H264 payload type first on the video media line.
pub fn prefer_h264(sdp: &str) -> Cow<'_, str> {
    prefer_codec(sdp, "H264")
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\n\
o=- 1 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
a=rtpmap:111 opus/48000/2\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 97 98\r\n\
a=rtpmap:96 VP8/90000\r\n\
a=rtpmap:97 H264/90000\r\n\
a=fmtp:97 packetization-mode=1\r\n\
a=rtpmap:98 VP9/90000\r\n";

    #[test]
    fn test_h264_moved_first() {
        let rewritten = prefer_h264(OFFER);
        assert!(rewritten.contains("m=video 9 UDP/TLS/RTP/SAVPF 97 96 98\r\n"));
    }

    #[test]
    fn test_rest_of_description_unchanged() {
        let rewritten = prefer_h264(OFFER);
        let before: Vec<&str> = OFFER.split("\r\n").collect();
        let after: Vec<&str> = rewritten.split("\r\n").collect();
        assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(after.iter()) {
            if !b.starts_with("m=video") {
                assert_eq!(b, a);
            }
        }
    }

    #[test]
    fn test_no_h264_is_byte_identical() {
        let offer = OFFER.replace("a=rtpmap:97 H264/90000", "a=rtpmap:97 AV1/90000");
        let rewritten = prefer_h264(&offer);
        assert!(matches!(rewritten, Cow::Borrowed(_)));
        assert_eq!(rewritten, offer);
    }

    #[test]
    fn test_no_video_line_is_unchanged() {
        let offer = "v=0\r\nm=audio 9 RTP/AVP 111\r\na=rtpmap:111 opus/48000/2\r\n";
        assert_eq!(prefer_h264(offer), offer);
    }

    #[test]
    fn test_already_first_is_unchanged() {
        let offer = OFFER.replace("SAVPF 96 97 98", "SAVPF 97 96 98");
        assert!(matches!(prefer_h264(&offer), Cow::Borrowed(_)));
    }

    #[test]
    fn test_first_h264_mapping_wins() {
        let offer = "m=video 9 RTP/AVP 96 102 127\n\
a=rtpmap:96 VP8/90000\n\
a=rtpmap:102 h264/90000\n\
a=rtpmap:127 H264/90000\n";
        let rewritten = prefer_h264(offer);
        assert!(rewritten.starts_with("m=video 9 RTP/AVP 102 96 127\n"));
    }

    #[test]
    fn test_lf_only_endings_preserved() {
        let offer = OFFER.replace("\r\n", "\n");
        let rewritten = prefer_h264(&offer);
        assert!(!rewritten.contains('\r'));
        assert!(rewritten.contains("SAVPF 97 96 98\n"));
    }

    #[test]
    fn test_mapping_outside_video_section_ignored() {
        let offer = "m=audio 9 RTP/AVP 97\r\n\
a=rtpmap:97 H264/90000\r\n\
m=video 9 RTP/AVP 96 98\r\n\
a=rtpmap:96 VP8/90000\r\n";
        assert_eq!(prefer_h264(offer), offer);
    }

    #[test]
    fn test_prefer_other_codec() {
        let rewritten = prefer_codec(OFFER, "vp9");
        assert!(rewritten.contains("SAVPF 98 96 97\r\n"));
    }
}
