//! Fixed documents served through `qXfer`

use crate::rsp::codec;

/// Target description: core M-profile registers plus single-precision VFP,
/// numbered to match [`super::registers`].
pub const TARGET_XML: &str = r#"<?xml version="1.0"?>
<!DOCTYPE target SYSTEM "gdb-target.dtd">
<target version="1.0">
  <architecture>arm</architecture>
  <feature name="org.gnu.gdb.arm.m-profile">
    <reg name="r0" bitsize="32" regnum="0"/>
    <reg name="r1" bitsize="32"/>
    <reg name="r2" bitsize="32"/>
    <reg name="r3" bitsize="32"/>
    <reg name="r4" bitsize="32"/>
    <reg name="r5" bitsize="32"/>
    <reg name="r6" bitsize="32"/>
    <reg name="r7" bitsize="32"/>
    <reg name="r8" bitsize="32"/>
    <reg name="r9" bitsize="32"/>
    <reg name="r10" bitsize="32"/>
    <reg name="r11" bitsize="32"/>
    <reg name="r12" bitsize="32"/>
    <reg name="sp" bitsize="32" type="data_ptr"/>
    <reg name="lr" bitsize="32"/>
    <reg name="pc" bitsize="32" type="code_ptr"/>
    <reg name="xpsr" bitsize="32" regnum="25"/>
  </feature>
  <feature name="org.gnu.gdb.arm.m-system">
    <reg name="msp" bitsize="32" regnum="26" type="data_ptr" group="system"/>
    <reg name="psp" bitsize="32" regnum="27" type="data_ptr" group="system"/>
    <reg name="control" bitsize="32" regnum="28" group="system"/>
    <reg name="faultmask" bitsize="32" regnum="29" group="system"/>
    <reg name="basepri" bitsize="32" regnum="30" group="system"/>
    <reg name="primask" bitsize="32" regnum="31" group="system"/>
  </feature>
  <feature name="org.gnu.gdb.arm.vfp">
    <reg name="s0" bitsize="32" regnum="32" type="float" group="float"/>
    <reg name="s1" bitsize="32" type="float" group="float"/>
    <reg name="s2" bitsize="32" type="float" group="float"/>
    <reg name="s3" bitsize="32" type="float" group="float"/>
    <reg name="s4" bitsize="32" type="float" group="float"/>
    <reg name="s5" bitsize="32" type="float" group="float"/>
    <reg name="s6" bitsize="32" type="float" group="float"/>
    <reg name="s7" bitsize="32" type="float" group="float"/>
    <reg name="s8" bitsize="32" type="float" group="float"/>
    <reg name="s9" bitsize="32" type="float" group="float"/>
    <reg name="s10" bitsize="32" type="float" group="float"/>
    <reg name="s11" bitsize="32" type="float" group="float"/>
    <reg name="s12" bitsize="32" type="float" group="float"/>
    <reg name="s13" bitsize="32" type="float" group="float"/>
    <reg name="s14" bitsize="32" type="float" group="float"/>
    <reg name="s15" bitsize="32" type="float" group="float"/>
    <reg name="s16" bitsize="32" type="float" group="float"/>
    <reg name="s17" bitsize="32" type="float" group="float"/>
    <reg name="s18" bitsize="32" type="float" group="float"/>
    <reg name="s19" bitsize="32" type="float" group="float"/>
    <reg name="s20" bitsize="32" type="float" group="float"/>
    <reg name="s21" bitsize="32" type="float" group="float"/>
    <reg name="s22" bitsize="32" type="float" group="float"/>
    <reg name="s23" bitsize="32" type="float" group="float"/>
    <reg name="s24" bitsize="32" type="float" group="float"/>
    <reg name="s25" bitsize="32" type="float" group="float"/>
    <reg name="s26" bitsize="32" type="float" group="float"/>
    <reg name="s27" bitsize="32" type="float" group="float"/>
    <reg name="s28" bitsize="32" type="float" group="float"/>
    <reg name="s29" bitsize="32" type="float" group="float"/>
    <reg name="s30" bitsize="32" type="float" group="float"/>
    <reg name="s31" bitsize="32" type="float" group="float"/>
    <reg name="fpscr" bitsize="32" regnum="64" group="float"/>
  </feature>
</target>"#;

/// `qXfer` reply for `length` bytes of `document` at `offset`: `m` when more
/// data follows, `l` for the final (possibly empty) chunk.
pub fn xfer_window(document: &[u8], offset: u32, length: u32) -> Vec<u8> {
    let start = (offset as usize).min(document.len());
    let end = start.saturating_add(length as usize).min(document.len());
    let marker = if end < document.len() { b'm' } else { b'l' };

    let mut reply = vec![marker];
    reply.extend_from_slice(&codec::escape_binary(&document[start..end]));
    reply
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_in_the_middle() {
        assert_eq!(xfer_window(b"abcdefgh", 2, 3), b"mcde");
    }

    #[test]
    fn test_window_reaching_the_end() {
        assert_eq!(xfer_window(b"abcdefgh", 5, 3), b"lfgh");
        assert_eq!(xfer_window(b"abcdefgh", 5, 100), b"lfgh");
    }

    #[test]
    fn test_window_past_the_end() {
        assert_eq!(xfer_window(b"abc", 10, 4), b"l");
    }

    #[test]
    fn test_window_escapes_reserved_bytes() {
        assert_eq!(xfer_window(b"a#b", 0, 3), vec![b'l', b'a', 0x7d, b'#' ^ 0x20, b'b']);
    }

    #[test]
    fn test_target_xml_names_profile_features() {
        assert!(TARGET_XML.contains("org.gnu.gdb.arm.m-profile"));
        assert!(TARGET_XML.contains("regnum=\"25\""));
        assert!(TARGET_XML.contains("name=\"fpscr\" bitsize=\"32\" regnum=\"64\""));
    }
}
